//! Revisioned persistence of the topology graph.
//!
//! Every write produces an immutable document keyed `<ID>-<Revision>`.
//! A document is live until a later revision or a deletion stamps its
//! `ArchivedAt` field; at most one document per ID is live at any time.
//!
//! ## Write workflows
//!
//! ```text
//! NodeAdded/EdgeAdded   → index <ID>-<rev>           → tracker[ID] = rev  → rollover?
//! MetadataUpdated       → archive <ID>-<tracked rev> → index <ID>-<rev>   → rollover?
//! NodeDeleted/EdgeDeleted → forget tracker[ID]       → stamp DeletedAt = ArchivedAt
//! ```
//!
//! Writes hold the write gate shared; a rollover holds it exclusively, so no
//! write interleaves with the relocation of the live set. The shared guard is
//! released before a write acts on a rollover signal.
//!
//! ## Configuration
//!
//! - `TOPOLOGY_RESTORE_REVISION_ON_DELETE_FAILURE`: re-insert the tracker
//!   entry when a delete cannot be persisted (default: false)

pub mod query;
pub mod rollover;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::GraphBackend;
use crate::mapper;
use crate::matcher::ElementMatcher;
use crate::store::{Document, StoreClient};
use crate::tracker::RevisionTracker;
use crate::types::{Edge, Element, ElementKind, GraphContext, GraphElement, Identifier, Node};

/// Error type for history operations.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// No revision is recorded for an element that should have one.
    #[error("Update from an unknown revision: {kind} {id}")]
    UnknownRevision {
        /// Element kind.
        kind: ElementKind,
        /// Element identifier.
        id: Identifier,
    },
    /// An update did not advance the revision.
    #[error("Stale revision for {kind} {id}: recorded {recorded}, submitted {submitted}")]
    StaleRevision {
        /// Element kind.
        kind: ElementKind,
        /// Element identifier.
        id: Identifier,
        /// Revision already written.
        recorded: i64,
        /// Revision submitted by the caller.
        submitted: i64,
    },
    /// The store client failed.
    #[error("Store error during {operation} on {kind} {target}: {source}")]
    Store {
        /// Store operation.
        operation: &'static str,
        /// Document kind.
        kind: ElementKind,
        /// Document id or index.
        target: String,
        /// Underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The store client could not be started.
    #[error("Store failed to start: {0}")]
    Start(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// An index rollover aborted.
    #[error("Index rollover failed: {0}")]
    Rollover(#[source] Box<HistoryError>),
}

impl HistoryError {
    fn store<E>(operation: &'static str, kind: ElementKind, target: impl Into<String>) -> impl FnOnce(E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let target = target.into();
        move |e| Self::Store { operation, kind, target, source: Box::new(e) }
    }
}

/// Configuration for the history backend.
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    /// Put the tracker entry back when a delete fails to persist.
    ///
    /// Off by default: the entry is dropped before the store write and stays
    /// dropped, leaving the last document live but no longer updatable.
    pub restore_revision_on_delete_failure: bool,
}

impl BackendConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            restore_revision_on_delete_failure: std::env::var("TOPOLOGY_RESTORE_REVISION_ON_DELETE_FAILURE")
                .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}

/// Graph backend persisting every revision to a [`StoreClient`].
pub struct HistoryBackend<C: StoreClient> {
    client: Arc<C>,
    tracker: RevisionTracker,
    config: BackendConfig,
    rolling: AtomicBool,
    gate: RwLock<()>,
}

impl<C: StoreClient + 'static> HistoryBackend<C> {
    /// Start `client` and wrap it in a backend with an empty tracker.
    pub async fn new(client: Arc<C>, config: BackendConfig) -> Result<Self, HistoryError> {
        client
            .start()
            .await
            .map_err(|e| HistoryError::Start(Box::new(e)))?;

        Ok(Self {
            client,
            tracker: RevisionTracker::new(),
            config,
            rolling: AtomicBool::new(false),
            gate: RwLock::new(()),
        })
    }

    /// The underlying store client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The revision tracker.
    pub fn tracker(&self) -> &RevisionTracker {
        &self.tracker
    }

    /// Backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Raw document holding `revision` of `id`, read from the live index.
    pub async fn document(
        &self,
        kind: ElementKind,
        id: &Identifier,
        revision: i64,
    ) -> Result<Option<Document>, HistoryError> {
        let doc_id = id.document_id(revision);
        self.client
            .get(kind, &doc_id)
            .await
            .map_err(HistoryError::store("get", kind, doc_id.clone()))
    }

    /// Index one document and record its revision, without acting on the
    /// rollover signal.
    async fn index_document(
        &self,
        kind: ElementKind,
        element: &GraphElement,
        doc: Document,
    ) -> Result<bool, HistoryError> {
        let doc_id = element.id.document_id(element.revision);
        let should_roll = self
            .client
            .bulk_index(kind, &doc_id, doc)
            .await
            .map_err(HistoryError::store("index", kind, doc_id.clone()))?;

        self.tracker.record(&element.id, element.revision);
        Ok(should_roll)
    }

    /// Act on a rollover signal. Must be called without the gate held.
    async fn roll_if(&self, should_roll: bool) -> Result<(), HistoryError> {
        if should_roll {
            self.roll_over()
                .await
                .map_err(|e| HistoryError::Rollover(Box::new(e)))?;
        }
        Ok(())
    }

    /// Write a new live document, rolling the index if the store asks for it.
    async fn create(&self, kind: ElementKind, element: &GraphElement, doc: Document) -> Result<(), HistoryError> {
        let should_roll = {
            let _writing = self.gate.read().await;
            self.index_document(kind, element, doc).await?
        };
        self.roll_if(should_roll).await
    }

    /// Stamp `ArchivedAt = updated_at` on the last recorded revision.
    async fn archive(&self, kind: ElementKind, element: &GraphElement) -> Result<(), HistoryError> {
        let revision = self
            .tracker
            .get(&element.id)
            .ok_or_else(|| HistoryError::UnknownRevision { kind, id: element.id.clone() })?;

        let doc_id = element.id.document_id(revision);
        self.client
            .bulk_update_with_partial_doc(kind, &doc_id, mapper::archive_patch(&element.updated_at))
            .await
            .map_err(HistoryError::store("archive", kind, doc_id.clone()))
    }

    /// Archive the previous revision, then write the new one.
    async fn update(&self, kind: ElementKind, element: &GraphElement, doc: Document) -> Result<(), HistoryError> {
        let should_roll = {
            let _writing = self.gate.read().await;
            if let Some(recorded) = self.tracker.get(&element.id) {
                if element.revision <= recorded {
                    return Err(HistoryError::StaleRevision {
                        kind,
                        id: element.id.clone(),
                        recorded,
                        submitted: element.revision,
                    });
                }
            }

            self.archive(kind, element).await?;
            self.index_document(kind, element, doc).await?
        };
        self.roll_if(should_roll).await
    }

    /// Mark the current revision deleted and archived.
    async fn delete(&self, kind: ElementKind, element: &GraphElement) -> Result<(), HistoryError> {
        let _writing = self.gate.read().await;
        let previous = self.tracker.remove(&element.id);

        let at = element.deletion_time();
        let doc_id = element.id.document_id(element.revision);
        let result = self
            .client
            .bulk_update_with_partial_doc(kind, &doc_id, mapper::delete_patch(&at))
            .await
            .map_err(HistoryError::store("delete", kind, doc_id.clone()));

        if result.is_err() {
            match previous {
                Some(revision) if self.config.restore_revision_on_delete_failure => {
                    self.tracker.record(&element.id, revision);
                    tracing::warn!(kind = %kind, id = %element.id, revision, "Deletion not persisted, revision restored");
                }
                Some(revision) => tracing::warn!(
                    kind = %kind,
                    id = %element.id,
                    revision,
                    "Revision forgotten although the deletion was not persisted"
                ),
                None => tracing::warn!(kind = %kind, id = %element.id, "Deletion not persisted for an untracked element"),
            }
        }
        result
    }
}

fn report(operation: &str, kind: ElementKind, id: &Identifier, err: &HistoryError) {
    match err {
        HistoryError::StaleRevision { .. } => {
            tracing::warn!(operation, kind = %kind, id = %id, error = %err, "Write rejected")
        }
        _ => tracing::error!(operation, kind = %kind, id = %id, error = %err, "Write failed"),
    }
}

#[async_trait]
impl<C: StoreClient + 'static> GraphBackend for HistoryBackend<C> {
    async fn node_added(&self, node: &Node) -> bool {
        self.create(ElementKind::Node, &node.element, mapper::map_node(node))
            .await
            .map_err(|e| report("add", ElementKind::Node, node.id(), &e))
            .is_ok()
    }

    async fn node_deleted(&self, node: &Node) -> bool {
        self.delete(ElementKind::Node, &node.element)
            .await
            .map_err(|e| report("delete", ElementKind::Node, node.id(), &e))
            .is_ok()
    }

    async fn edge_added(&self, edge: &Edge) -> bool {
        self.create(ElementKind::Edge, &edge.element, mapper::map_edge(edge))
            .await
            .map_err(|e| report("add", ElementKind::Edge, edge.id(), &e))
            .is_ok()
    }

    async fn edge_deleted(&self, edge: &Edge) -> bool {
        self.delete(ElementKind::Edge, &edge.element)
            .await
            .map_err(|e| report("delete", ElementKind::Edge, edge.id(), &e))
            .is_ok()
    }

    async fn metadata_updated(&self, element: &Element) -> bool {
        let kind = element.kind();
        self.update(kind, element.base(), mapper::map(element))
            .await
            .map_err(|e| report("update", kind, element.id(), &e))
            .is_ok()
    }

    async fn get_node(&self, id: &Identifier, context: &GraphContext) -> Vec<Node> {
        self.fetch_node(id, context)
            .await
            .unwrap_or_else(|e| query::report(ElementKind::Node, &e))
    }

    async fn get_edge(&self, id: &Identifier, context: &GraphContext) -> Vec<Edge> {
        self.fetch_edge(id, context)
            .await
            .unwrap_or_else(|e| query::report(ElementKind::Edge, &e))
    }

    async fn get_nodes(&self, context: &GraphContext, matcher: Option<&dyn ElementMatcher>) -> Vec<Node> {
        self.fetch_nodes(context, matcher)
            .await
            .unwrap_or_else(|e| query::report(ElementKind::Node, &e))
    }

    async fn get_edges(&self, context: &GraphContext, matcher: Option<&dyn ElementMatcher>) -> Vec<Edge> {
        self.fetch_edges(context, matcher)
            .await
            .unwrap_or_else(|e| query::report(ElementKind::Edge, &e))
    }

    async fn get_node_edges(
        &self,
        node: &Node,
        context: &GraphContext,
        matcher: Option<&dyn ElementMatcher>,
    ) -> Vec<Edge> {
        self.fetch_node_edges(node, context, matcher)
            .await
            .unwrap_or_else(|e| query::report(ElementKind::Edge, &e))
    }

    async fn get_edge_nodes(
        &self,
        edge: &Edge,
        context: &GraphContext,
        parent_matcher: Option<&dyn ElementMatcher>,
        child_matcher: Option<&dyn ElementMatcher>,
    ) -> (Vec<Node>, Vec<Node>) {
        let parents = self
            .get_node(&edge.parent, context)
            .await
            .into_iter()
            .filter(|n| parent_matcher.map_or(true, |m| m.matches(&n.element.metadata)))
            .collect();
        let children = self
            .get_node(&edge.child, context)
            .await
            .into_iter()
            .filter(|n| child_matcher.map_or(true, |m| m.matches(&n.element.metadata)))
            .collect();
        (parents, children)
    }

    fn is_history_supported(&self) -> bool {
        true
    }
}
