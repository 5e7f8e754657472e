//! Time-scoped queries.
//!
//! A query combines up to three filters with AND:
//!
//! 1. a time filter derived from the context,
//! 2. an identity filter (`ID`, or `Parent`/`Child` for node edges),
//! 3. an optional metadata filter produced by an [`ElementMatcher`].
//!
//! Without a time slice, queries target the live index alias and only
//! unarchived documents; with one, they span every index.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::filter::Filter;
use crate::mapper::{self, DecodeError, FIELD_ARCHIVED_AT, FIELD_CHILD, FIELD_ID, FIELD_METADATA, FIELD_PARENT, FIELD_REVISION, FIELD_UPDATED_AT};
use crate::matcher::ElementMatcher;
use crate::store::{SearchHit, SortSpec, StoreClient};
use crate::types::{Edge, ElementKind, GraphContext, GraphElement, Identifier, Node, TimeSlice};
use super::{HistoryBackend, HistoryError};

/// Filters of one search, each optional.
#[derive(Debug, Clone, Default)]
pub struct TimedSearchQuery {
    /// Identity or equality filter on top-level fields.
    pub filter: Option<Filter>,
    /// Temporal filter on top-level fields.
    pub time_filter: Option<Filter>,
    /// Filter relative to the metadata map.
    pub metadata_filter: Option<Filter>,
    /// Result ordering.
    pub sort: Option<SortSpec>,
}

impl TimedSearchQuery {
    /// Combine the present filters, formatted by `client`, with AND.
    ///
    /// Returns `None` when no filter is present.
    pub fn compose<C: StoreClient + ?Sized>(&self, client: &C) -> Option<Filter> {
        let parts: Vec<Filter> = [
            client.format_filter(self.time_filter.as_ref(), ""),
            client.format_filter(self.filter.as_ref(), ""),
            client.format_filter(self.metadata_filter.as_ref(), FIELD_METADATA),
        ]
        .into_iter()
        .flatten()
        .collect();
        Filter::all_of(parts)
    }
}

/// Temporal filter for an optional slice.
///
/// - no slice: live documents only (`ArchivedAt` absent)
/// - slice `[start, last]`: documents valid at some instant of the slice,
///   i.e. written no later than `last` and not archived before `start`
pub fn time_filter(slice: Option<&TimeSlice>) -> Filter {
    match slice {
        None => Filter::null(FIELD_ARCHIVED_AT),
        Some(slice) => Filter::and(vec![
            Filter::lte(FIELD_UPDATED_AT, slice.last_millis()),
            Filter::or(vec![
                Filter::null(FIELD_ARCHIVED_AT),
                Filter::gte(FIELD_ARCHIVED_AT, slice.start_millis()),
            ]),
        ]),
    }
}

/// Edges having `id` as parent or child.
pub fn node_edges_filter(id: &Identifier) -> Filter {
    Filter::or(vec![
        Filter::term(FIELD_PARENT, id.as_str()),
        Filter::term(FIELD_CHILD, id.as_str()),
    ])
}

trait Revisioned {
    fn element(&self) -> &GraphElement;
}

impl Revisioned for Node {
    fn element(&self) -> &GraphElement {
        &self.element
    }
}

impl Revisioned for Edge {
    fn element(&self) -> &GraphElement {
        &self.element
    }
}

fn recency<T: Revisioned>(item: &T) -> (i64, DateTime<Utc>) {
    (item.element().revision, item.element().updated_at)
}

/// Keep one item per ID: the greatest revision, ties going to the later
/// update and then to the later position. Survivors keep their order.
fn dedup_latest<T: Revisioned>(items: Vec<T>) -> Vec<T> {
    let mut best: HashMap<&Identifier, usize> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        match best.get(&item.element().id) {
            Some(&j) if recency(&items[j]) > recency(item) => {}
            _ => {
                best.insert(&item.element().id, i);
            }
        }
    }
    let keep: HashSet<usize> = best.into_values().collect();

    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| keep.contains(&i).then_some(item))
        .collect()
}

/// Deduplicate nodes to one revision per ID.
pub fn dedup_nodes(nodes: Vec<Node>) -> Vec<Node> {
    dedup_latest(nodes)
}

/// Deduplicate edges to one revision per ID.
pub fn dedup_edges(edges: Vec<Edge>) -> Vec<Edge> {
    dedup_latest(edges)
}

fn decode_hits<T>(kind: ElementKind, hits: Vec<SearchHit>, decode: fn(&Value) -> Result<T, DecodeError>) -> Vec<T> {
    hits.into_iter()
        .filter_map(|hit| match decode(&hit.source) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::debug!(
                    kind = %kind,
                    index = %hit.index,
                    document = %hit.id,
                    error = %e,
                    "Dropping undecodable hit"
                );
                None
            }
        })
        .collect()
}

/// Log a failed query and yield an empty result.
pub(crate) fn report<T>(kind: ElementKind, err: &HistoryError) -> Vec<T> {
    tracing::error!(kind = %kind, error = %err, "Query failed");
    Vec::new()
}

fn metadata_filter(kind: ElementKind, matcher: Option<&dyn ElementMatcher>) -> Result<Option<Filter>, ()> {
    match matcher.map(|m| m.filter()).transpose() {
        Ok(filter) => Ok(filter.flatten()),
        Err(e) => {
            tracing::debug!(kind = %kind, error = %e, "Metadata predicate failed, returning no results");
            Err(())
        }
    }
}

impl<C: StoreClient + 'static> HistoryBackend<C> {
    /// Index targeted by a context: the live alias, or every index.
    fn target_index(&self, context: &GraphContext) -> Option<String> {
        context.time_slice.is_none().then(|| self.client.index_alias())
    }

    async fn query(
        &self,
        kind: ElementKind,
        query: &TimedSearchQuery,
        index: Option<&str>,
    ) -> Result<Vec<SearchHit>, HistoryError> {
        let filter = query.compose(self.client.as_ref());
        self.client
            .search(kind, filter.as_ref(), index, query.sort.as_ref())
            .await
            .map_err(HistoryError::store("search", kind, index.unwrap_or("*")))
    }

    /// Search nodes, dropping hits that fail to decode.
    pub async fn search_nodes(&self, query: &TimedSearchQuery, index: Option<&str>) -> Result<Vec<Node>, HistoryError> {
        let hits = self.query(ElementKind::Node, query, index).await?;
        Ok(decode_hits(ElementKind::Node, hits, mapper::decode_node))
    }

    /// Search edges, dropping hits that fail to decode.
    pub async fn search_edges(&self, query: &TimedSearchQuery, index: Option<&str>) -> Result<Vec<Edge>, HistoryError> {
        let hits = self.query(ElementKind::Edge, query, index).await?;
        Ok(decode_hits(ElementKind::Edge, hits, mapper::decode_edge))
    }

    fn single_query(id: &Identifier, context: &GraphContext) -> TimedSearchQuery {
        TimedSearchQuery {
            filter: Some(Filter::term(FIELD_ID, id.as_str())),
            time_filter: Some(time_filter(context.time_slice.as_ref())),
            metadata_filter: None,
            sort: Some(SortSpec::ascending(FIELD_REVISION)),
        }
    }

    fn listing_query(context: &GraphContext, filter: Option<Filter>, metadata_filter: Option<Filter>) -> TimedSearchQuery {
        TimedSearchQuery {
            filter,
            time_filter: Some(time_filter(context.time_slice.as_ref())),
            metadata_filter,
            sort: Some(SortSpec::ascending(FIELD_UPDATED_AT)),
        }
    }

    /// Revisions of one node, sorted by revision.
    pub async fn fetch_node(&self, id: &Identifier, context: &GraphContext) -> Result<Vec<Node>, HistoryError> {
        let index = self.target_index(context);
        let mut nodes = self.search_nodes(&Self::single_query(id, context), index.as_deref()).await?;
        if context.time_point && nodes.len() > 1 {
            nodes.drain(..nodes.len() - 1);
        }
        Ok(nodes)
    }

    /// Revisions of one edge, sorted by revision.
    pub async fn fetch_edge(&self, id: &Identifier, context: &GraphContext) -> Result<Vec<Edge>, HistoryError> {
        let index = self.target_index(context);
        let mut edges = self.search_edges(&Self::single_query(id, context), index.as_deref()).await?;
        if context.time_point && edges.len() > 1 {
            edges.drain(..edges.len() - 1);
        }
        Ok(edges)
    }

    /// Nodes within the context, sorted by update time.
    pub async fn fetch_nodes(
        &self,
        context: &GraphContext,
        matcher: Option<&dyn ElementMatcher>,
    ) -> Result<Vec<Node>, HistoryError> {
        let Ok(metadata_filter) = metadata_filter(ElementKind::Node, matcher) else {
            return Ok(Vec::new());
        };
        let index = self.target_index(context);
        let query = Self::listing_query(context, None, metadata_filter);
        let nodes = self.search_nodes(&query, index.as_deref()).await?;
        Ok(if context.time_point { dedup_nodes(nodes) } else { nodes })
    }

    /// Edges within the context, sorted by update time.
    pub async fn fetch_edges(
        &self,
        context: &GraphContext,
        matcher: Option<&dyn ElementMatcher>,
    ) -> Result<Vec<Edge>, HistoryError> {
        let Ok(metadata_filter) = metadata_filter(ElementKind::Edge, matcher) else {
            return Ok(Vec::new());
        };
        let index = self.target_index(context);
        let query = Self::listing_query(context, None, metadata_filter);
        let edges = self.search_edges(&query, index.as_deref()).await?;
        Ok(if context.time_point { dedup_edges(edges) } else { edges })
    }

    /// Edges touching `node` within the context.
    pub async fn fetch_node_edges(
        &self,
        node: &Node,
        context: &GraphContext,
        matcher: Option<&dyn ElementMatcher>,
    ) -> Result<Vec<Edge>, HistoryError> {
        let Ok(metadata_filter) = metadata_filter(ElementKind::Edge, matcher) else {
            return Ok(Vec::new());
        };
        let index = self.target_index(context);
        let query = Self::listing_query(context, Some(node_edges_filter(node.id())), metadata_filter);
        let edges = self.search_edges(&query, index.as_deref()).await?;
        Ok(if context.time_point { dedup_edges(edges) } else { edges })
    }
}
