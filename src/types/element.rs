//! Graph elements: the shared base plus the node and edge variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifier::{ElementKind, Identifier};
use super::metadata::Metadata;

/// Fields shared by nodes and edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphElement {
    /// Stable identifier.
    pub id: Identifier,
    /// Host the element originates from.
    #[serde(default)]
    pub host: String,
    /// Metadata, replaced as a whole on each update.
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Time of the last change.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    /// Logical deletion time, once deleted.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Revision counter owned by the live graph.
    #[serde(default)]
    pub revision: i64,
}

impl GraphElement {
    /// Create a revision-0 element created at `at`.
    pub fn new(id: Identifier, host: impl Into<String>, metadata: Metadata, at: DateTime<Utc>) -> Self {
        Self {
            id,
            host: host.into(),
            metadata,
            created_at: at,
            updated_at: at,
            deleted_at: None,
            revision: 0,
        }
    }

    /// Replace the metadata and advance the revision, as the live graph does.
    pub fn set_metadata(&mut self, metadata: Metadata, at: DateTime<Utc>) {
        self.metadata = metadata;
        self.updated_at = at;
        self.revision += 1;
    }

    /// Mark the element as deleted at `at`.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
    }

    /// Deletion timestamp, falling back to the last update time.
    pub fn deletion_time(&self) -> DateTime<Utc> {
        self.deleted_at.unwrap_or(self.updated_at)
    }
}

/// A vertex of the topology graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Shared element fields.
    #[serde(flatten)]
    pub element: GraphElement,
}

impl Node {
    /// Create a new node at revision 0.
    pub fn new(id: impl Into<Identifier>, host: impl Into<String>, metadata: Metadata, at: DateTime<Utc>) -> Self {
        Self { element: GraphElement::new(id.into(), host, metadata, at) }
    }

    /// Node identifier.
    pub fn id(&self) -> &Identifier {
        &self.element.id
    }

    /// Current revision.
    pub fn revision(&self) -> i64 {
        self.element.revision
    }
}

/// A directed relation from `parent` to `child`.
///
/// The endpoints are referenced by ID only; they are resolved with separate
/// node lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Shared element fields.
    #[serde(flatten)]
    pub element: GraphElement,
    /// Source node.
    pub parent: Identifier,
    /// Target node.
    pub child: Identifier,
}

impl Edge {
    /// Create a new edge at revision 0.
    pub fn new(
        id: impl Into<Identifier>,
        parent: impl Into<Identifier>,
        child: impl Into<Identifier>,
        host: impl Into<String>,
        metadata: Metadata,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            element: GraphElement::new(id.into(), host, metadata, at),
            parent: parent.into(),
            child: child.into(),
        }
    }

    /// Edge identifier.
    pub fn id(&self) -> &Identifier {
        &self.element.id
    }

    /// Current revision.
    pub fn revision(&self) -> i64 {
        self.element.revision
    }
}

/// Either kind of graph element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Element {
    /// A node.
    Node(Node),
    /// An edge.
    Edge(Edge),
}

impl Element {
    /// Document kind of this element.
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Node(_) => ElementKind::Node,
            Self::Edge(_) => ElementKind::Edge,
        }
    }

    /// Shared fields.
    pub fn base(&self) -> &GraphElement {
        match self {
            Self::Node(n) => &n.element,
            Self::Edge(e) => &e.element,
        }
    }

    /// Element identifier.
    pub fn id(&self) -> &Identifier {
        &self.base().id
    }
}

impl From<Node> for Element {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<Edge> for Element {
    fn from(edge: Edge) -> Self {
        Self::Edge(edge)
    }
}
