//! Mapping between graph elements and persisted documents.
//!
//! ## Document layout
//!
//! | Field | Type | Notes |
//! |-------|------|-------|
//! | `ID` | string | element identifier |
//! | `Host` | string | origin host |
//! | `CreatedAt` / `UpdatedAt` | epoch ms | |
//! | `DeletedAt` | epoch ms | only once deleted |
//! | `ArchivedAt` | epoch ms | set by a later write, never by the mapper |
//! | `Metadata` | object | copy of the element metadata |
//! | `Revision` | integer | |
//! | `Parent` / `Child` | string | edges only |

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::store::Document;
use crate::types::{
    from_unix_millis, unix_millis, Edge, Element, ElementKind, GraphElement, Identifier, Metadata, Node,
};

/// Identifier field.
pub const FIELD_ID: &str = "ID";
/// Origin host field.
pub const FIELD_HOST: &str = "Host";
/// Creation time field.
pub const FIELD_CREATED_AT: &str = "CreatedAt";
/// Last update time field.
pub const FIELD_UPDATED_AT: &str = "UpdatedAt";
/// Deletion time field.
pub const FIELD_DELETED_AT: &str = "DeletedAt";
/// Archival time field.
pub const FIELD_ARCHIVED_AT: &str = "ArchivedAt";
/// Metadata field, also the prefix for metadata filters.
pub const FIELD_METADATA: &str = "Metadata";
/// Revision field.
pub const FIELD_REVISION: &str = "Revision";
/// Edge source field.
pub const FIELD_PARENT: &str = "Parent";
/// Edge target field.
pub const FIELD_CHILD: &str = "Child";

/// Error turning a stored document back into an element.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The source is not a JSON object.
    #[error("Document is not an object")]
    NotAnObject,
    /// A required field is absent.
    #[error("Missing field {0}")]
    MissingField(&'static str),
    /// A field has the wrong type or an out-of-range value.
    #[error("Invalid field {field}: expected {expected}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was expected.
        expected: &'static str,
    },
}

fn map_element(e: &GraphElement) -> Document {
    let mut doc = Map::new();
    doc.insert(FIELD_ID.into(), Value::String(e.id.as_str().to_string()));
    doc.insert(FIELD_HOST.into(), Value::String(e.host.clone()));
    doc.insert(FIELD_CREATED_AT.into(), unix_millis(&e.created_at).into());
    doc.insert(FIELD_UPDATED_AT.into(), unix_millis(&e.updated_at).into());
    doc.insert(FIELD_METADATA.into(), Value::Object(e.metadata.to_json_map()));
    doc.insert(FIELD_REVISION.into(), e.revision.into());
    if let Some(deleted_at) = &e.deleted_at {
        doc.insert(FIELD_DELETED_AT.into(), unix_millis(deleted_at).into());
    }
    doc
}

/// Document for a node.
pub fn map_node(node: &Node) -> Document {
    map_element(&node.element)
}

/// Document for an edge.
pub fn map_edge(edge: &Edge) -> Document {
    let mut doc = map_element(&edge.element);
    doc.insert(FIELD_PARENT.into(), Value::String(edge.parent.as_str().to_string()));
    doc.insert(FIELD_CHILD.into(), Value::String(edge.child.as_str().to_string()));
    doc
}

/// Document for either element kind.
pub fn map(element: &Element) -> Document {
    match element {
        Element::Node(n) => map_node(n),
        Element::Edge(e) => map_edge(e),
    }
}

/// Partial document stamping `ArchivedAt`.
pub fn archive_patch(at: &DateTime<Utc>) -> Document {
    let mut patch = Map::new();
    patch.insert(FIELD_ARCHIVED_AT.into(), unix_millis(at).into());
    patch
}

/// Partial document stamping both `DeletedAt` and `ArchivedAt` with `at`.
pub fn delete_patch(at: &DateTime<Utc>) -> Document {
    let ms = unix_millis(at);
    let mut patch = Map::new();
    patch.insert(FIELD_DELETED_AT.into(), ms.into());
    patch.insert(FIELD_ARCHIVED_AT.into(), ms.into());
    patch
}

fn required_str(doc: &Document, field: &'static str) -> Result<String, DecodeError> {
    match doc.get(field) {
        None | Some(Value::Null) => Err(DecodeError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(DecodeError::InvalidField { field, expected: "string" }),
    }
}

fn optional_i64(doc: &Document, field: &'static str) -> Result<Option<i64>, DecodeError> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or(DecodeError::InvalidField { field, expected: "integer" }),
    }
}

fn optional_time(doc: &Document, field: &'static str) -> Result<Option<DateTime<Utc>>, DecodeError> {
    optional_i64(doc, field)?
        .map(|ms| from_unix_millis(ms).ok_or(DecodeError::InvalidField { field, expected: "epoch milliseconds" }))
        .transpose()
}

fn required_time(doc: &Document, field: &'static str) -> Result<DateTime<Utc>, DecodeError> {
    optional_time(doc, field)?.ok_or(DecodeError::MissingField(field))
}

fn decode_element(source: &Value) -> Result<(GraphElement, &Document), DecodeError> {
    let doc = source.as_object().ok_or(DecodeError::NotAnObject)?;

    let host = match doc.get(FIELD_HOST) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(DecodeError::InvalidField { field: FIELD_HOST, expected: "string" }),
    };

    let metadata = match doc.get(FIELD_METADATA) {
        None | Some(Value::Null) => Metadata::new(),
        Some(Value::Object(m)) => Metadata::from_json_map(m.clone()),
        Some(_) => return Err(DecodeError::InvalidField { field: FIELD_METADATA, expected: "object" }),
    };

    let element = GraphElement {
        id: Identifier::new(required_str(doc, FIELD_ID)?),
        host,
        metadata,
        created_at: required_time(doc, FIELD_CREATED_AT)?,
        updated_at: required_time(doc, FIELD_UPDATED_AT)?,
        deleted_at: optional_time(doc, FIELD_DELETED_AT)?,
        revision: optional_i64(doc, FIELD_REVISION)?.unwrap_or(0),
    };
    Ok((element, doc))
}

/// Decode a stored node document.
pub fn decode_node(source: &Value) -> Result<Node, DecodeError> {
    let (element, _) = decode_element(source)?;
    Ok(Node { element })
}

/// Decode a stored edge document.
pub fn decode_edge(source: &Value) -> Result<Edge, DecodeError> {
    let (element, doc) = decode_element(source)?;
    Ok(Edge {
        element,
        parent: Identifier::new(required_str(doc, FIELD_PARENT)?),
        child: Identifier::new(required_str(doc, FIELD_CHILD)?),
    })
}

/// Decode a stored document of the given kind.
pub fn decode(kind: ElementKind, source: &Value) -> Result<Element, DecodeError> {
    match kind {
        ElementKind::Node => decode_node(source).map(Element::Node),
        ElementKind::Edge => decode_edge(source).map(Element::Edge),
    }
}
