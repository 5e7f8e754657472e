//! Graph backend interface driven by the live topology graph.

use async_trait::async_trait;

use crate::matcher::ElementMatcher;
use crate::types::{Edge, Element, GraphContext, Identifier, Node};

/// Persistence backend notified of every topology change.
///
/// Write notifications report success as a `bool`; reads return whatever
/// could be retrieved. Failures are logged by the implementation and never
/// propagated as errors to the live graph.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// A node was created.
    async fn node_added(&self, node: &Node) -> bool;

    /// A node was deleted.
    async fn node_deleted(&self, node: &Node) -> bool;

    /// An edge was created.
    async fn edge_added(&self, edge: &Edge) -> bool;

    /// An edge was deleted.
    async fn edge_deleted(&self, edge: &Edge) -> bool;

    /// The metadata of an existing element changed and its revision advanced.
    async fn metadata_updated(&self, element: &Element) -> bool;

    /// Revisions of one node within the context.
    async fn get_node(&self, id: &Identifier, context: &GraphContext) -> Vec<Node>;

    /// Revisions of one edge within the context.
    async fn get_edge(&self, id: &Identifier, context: &GraphContext) -> Vec<Edge>;

    /// Nodes within the context whose metadata satisfies `matcher`.
    async fn get_nodes(&self, context: &GraphContext, matcher: Option<&dyn ElementMatcher>) -> Vec<Node>;

    /// Edges within the context whose metadata satisfies `matcher`.
    async fn get_edges(&self, context: &GraphContext, matcher: Option<&dyn ElementMatcher>) -> Vec<Edge>;

    /// Edges having `node` as parent or child.
    async fn get_node_edges(
        &self,
        node: &Node,
        context: &GraphContext,
        matcher: Option<&dyn ElementMatcher>,
    ) -> Vec<Edge>;

    /// Parent and child nodes of `edge`, each filtered by its own matcher.
    async fn get_edge_nodes(
        &self,
        edge: &Edge,
        context: &GraphContext,
        parent_matcher: Option<&dyn ElementMatcher>,
        child_matcher: Option<&dyn ElementMatcher>,
    ) -> (Vec<Node>, Vec<Node>);

    /// Whether historical queries are answered.
    fn is_history_supported(&self) -> bool;
}
