//! Index rollover.
//!
//! Relocates the live set into a fresh index. The protocol is strictly
//! ordered and any failure aborts it:
//!
//! ```text
//! fetch live nodes + edges → archive each in the old index (ArchivedAt = now)
//!   → roll_index → re-index each with its revision unchanged
//! ```
//!
//! Writes are held off for the whole protocol. Re-indexed documents do not
//! count toward the next rollover threshold.
//!
//! A failure midway leaves the store without the full live set in the new
//! index. Nothing is retried.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::mapper;
use crate::store::{Document, StoreClient};
use crate::types::{now_millis, ElementKind, GraphContext, GraphElement};
use super::{HistoryBackend, HistoryError};

/// Holds the rollover flag until dropped.
struct RollingGuard<'a>(&'a AtomicBool);

impl<'a> RollingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RollingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<C: StoreClient + 'static> HistoryBackend<C> {
    /// Copy one live element into the freshly rolled index.
    async fn relocate(&self, kind: ElementKind, element: &GraphElement, doc: Document) -> Result<(), HistoryError> {
        let doc_id = element.id.document_id(element.revision);
        self.client
            .reindex(kind, &doc_id, doc)
            .await
            .map_err(HistoryError::store("reindex", kind, doc_id.clone()))?;
        self.tracker.record(&element.id, element.revision);
        Ok(())
    }

    /// Whether a rollover is in progress.
    pub fn is_rolling(&self) -> bool {
        self.rolling.load(Ordering::Acquire)
    }

    /// Archive the live set, roll the index and re-create the live set in
    /// the new index.
    ///
    /// Returns immediately when another rollover is already running.
    pub async fn roll_over(&self) -> Result<(), HistoryError> {
        let Some(_guard) = RollingGuard::acquire(&self.rolling) else {
            tracing::debug!("Rollover already in progress, skipping");
            return Ok(());
        };
        let _exclusive = self.gate.write().await;

        let context = GraphContext::unscoped();
        let mut nodes = self.fetch_nodes(&context, None).await?;
        let mut edges = self.fetch_edges(&context, None).await?;
        tracing::info!(nodes = nodes.len(), edges = edges.len(), "Rolling index");

        tracing::debug!("Archiving live elements in the old index");
        for node in &mut nodes {
            node.element.updated_at = now_millis();
            self.archive(ElementKind::Node, &node.element).await?;
        }
        for edge in &mut edges {
            edge.element.updated_at = now_millis();
            self.archive(ElementKind::Edge, &edge.element).await?;
        }

        let alias = self.client.index_alias();
        self.client
            .roll_index()
            .await
            .map_err(HistoryError::store("roll", ElementKind::Node, alias))?;

        tracing::debug!("Re-creating live elements in the new index");
        for node in &nodes {
            self.relocate(ElementKind::Node, &node.element, mapper::map_node(node)).await?;
        }
        for edge in &edges {
            self.relocate(ElementKind::Edge, &edge.element, mapper::map_edge(edge)).await?;
        }

        tracing::info!(nodes = nodes.len(), edges = edges.len(), "Index rolled");
        Ok(())
    }
}
