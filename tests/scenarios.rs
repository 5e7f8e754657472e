//! Scenario tests for the history backend.
//!
//! These tests drive the backend through the live-graph event interface and
//! check what the store holds and what time-scoped queries return.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use topology_history::{
    BackendConfig, Edge, Element, ElementKind, Filter, GraphBackend, GraphContext,
    HistoryBackend, Identifier, InMemoryStoreClient, InMemoryStoreConfig, Metadata,
    MetadataMatcher, Node, StoreClient, StoreOp, TimeSlice, from_unix_millis, now_millis,
    unix_millis,
};
use topology_history::mapper::{FIELD_ARCHIVED_AT, FIELD_DELETED_AT};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn t(ms: i64) -> DateTime<Utc> {
    from_unix_millis(ms).unwrap()
}

fn slice(start: i64, last: i64) -> TimeSlice {
    TimeSlice::new(t(start), t(last))
}

async fn backend_with(config: InMemoryStoreConfig) -> HistoryBackend<InMemoryStoreClient> {
    HistoryBackend::new(Arc::new(InMemoryStoreClient::new(config)), BackendConfig::default())
        .await
        .unwrap()
}

async fn backend() -> HistoryBackend<InMemoryStoreClient> {
    backend_with(InMemoryStoreConfig::default()).await
}

fn host_node(id: &str, name: &str, at: i64) -> Node {
    Node::new(id, "agent1", Metadata::new().with("Type", "host").with("Name", name), t(at))
}

fn revisions(nodes: &[Node]) -> Vec<(String, i64)> {
    nodes.iter().map(|n| (n.id().to_string(), n.revision())).collect()
}

async fn update(b: &HistoryBackend<InMemoryStoreClient>, node: &mut Node, metadata: Metadata, at: i64) {
    node.element.set_metadata(metadata, t(at));
    assert!(b.metadata_updated(&Element::Node(node.clone())).await);
}

/// Live documents per ID across every index.
async fn live_documents(b: &HistoryBackend<InMemoryStoreClient>, kind: ElementKind) -> BTreeMap<String, usize> {
    let live = Filter::null(FIELD_ARCHIVED_AT);
    let hits = b.client().search(kind, Some(&live), None, None).await.unwrap();
    let mut counts = BTreeMap::new();
    for hit in hits {
        let id = hit.source["ID"].as_str().unwrap().to_string();
        *counts.entry(id).or_insert(0) += 1;
    }
    counts
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scenario_create_then_get() {
    let b = backend().await;
    let n1 = host_node("n1", "h1", 1_000);
    assert!(b.node_added(&n1).await);

    let got = b.get_node(n1.id(), &GraphContext::now()).await;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].revision(), 0);
    assert_eq!(got[0], n1);
}

#[tokio::test]
async fn test_scenario_update_then_time_point_and_history() {
    let b = backend().await;
    let mut n1 = host_node("n1", "h1", 1_000);
    assert!(b.node_added(&n1).await);
    update(&b, &mut n1, Metadata::new().with("Type", "host").with("Name", "h1-renamed"), 2_000).await;

    let now = b.get_node(n1.id(), &GraphContext::now()).await;
    assert_eq!(revisions(&now), vec![("n1".to_string(), 1)]);

    let history = b.get_node(n1.id(), &GraphContext::history(slice(1_000, 2_000))).await;
    assert_eq!(revisions(&history), vec![("n1".to_string(), 0), ("n1".to_string(), 1)]);
    assert_eq!(history[0].element.metadata.get("Name"), Some(&json!("h1")));
}

#[tokio::test]
async fn test_scenario_time_point_in_the_past() {
    let b = backend().await;
    let mut n1 = host_node("n1", "h1", 1_000);
    assert!(b.node_added(&n1).await);
    update(&b, &mut n1, Metadata::new().with("Name", "second"), 2_000).await;
    update(&b, &mut n1, Metadata::new().with("Name", "third"), 3_000).await;

    let before = b.get_node(n1.id(), &GraphContext::at(t(500))).await;
    assert!(before.is_empty());

    let at_1500 = b.get_node(n1.id(), &GraphContext::at(t(1_500))).await;
    assert_eq!(revisions(&at_1500), vec![("n1".to_string(), 0)]);

    let at_2500 = b.get_node(n1.id(), &GraphContext::at(t(2_500))).await;
    assert_eq!(revisions(&at_2500), vec![("n1".to_string(), 1)]);

    // archival instant belongs to both adjacent revisions; the greater wins
    let at_2000 = b.get_node(n1.id(), &GraphContext::at(t(2_000))).await;
    assert_eq!(revisions(&at_2000), vec![("n1".to_string(), 1)]);
}

#[tokio::test]
async fn test_scenario_delete_then_history() {
    let b = backend().await;
    let mut n1 = host_node("n1", "h1", 1_000);
    assert!(b.node_added(&n1).await);

    n1.element.mark_deleted(t(3_000));
    assert!(b.node_deleted(&n1).await);

    assert!(b.get_node(n1.id(), &GraphContext::now()).await.is_empty());
    assert!(b.get_nodes(&GraphContext::now(), None).await.is_empty());

    let history = b.get_node(n1.id(), &GraphContext::history(slice(1_500, 2_500))).await;
    assert_eq!(revisions(&history), vec![("n1".to_string(), 0)]);
    assert_eq!(history[0].element.deleted_at, Some(t(3_000)));

    let after = b.get_node(n1.id(), &GraphContext::history(slice(3_001, 4_000))).await;
    assert!(after.is_empty());
}

#[tokio::test]
async fn test_scenario_rollover_mid_session() {
    let b = backend().await;
    let mut n1 = host_node("n1", "h1", 1_000);
    let n2 = host_node("n2", "h2", 1_100);
    let e1 = Edge::new("e1", "n1", "n2", "agent1", Metadata::new().with("RelationType", "ownership"), t(1_200));
    assert!(b.node_added(&n1).await);
    assert!(b.node_added(&n2).await);
    assert!(b.edge_added(&e1).await);
    update(&b, &mut n1, Metadata::new().with("Type", "host").with("Name", "h1b"), 2_000).await;

    let content = |nodes: Vec<Node>| -> BTreeMap<Identifier, (i64, Metadata)> {
        nodes
            .into_iter()
            .map(|n| (n.element.id, (n.element.revision, n.element.metadata)))
            .collect()
    };
    let before_nodes = content(b.get_nodes(&GraphContext::now(), None).await);
    let old_index = b.client().live_index();

    b.roll_over().await.unwrap();

    assert_ne!(b.client().live_index(), old_index);
    let after_nodes = content(b.get_nodes(&GraphContext::now(), None).await);
    assert_eq!(after_nodes, before_nodes);
    assert_eq!(after_nodes.len(), 2);

    let edges = b.get_edges(&GraphContext::now(), None).await;
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].id(), e1.id());
    assert_eq!(edges[0].revision(), 0);

    let archived: Vec<String> = b
        .client()
        .documents_in(&old_index, ElementKind::Node)
        .into_iter()
        .filter(|(_, doc)| doc.contains_key(FIELD_ARCHIVED_AT))
        .map(|(id, _)| id)
        .collect();
    assert_eq!(archived, vec!["n1-0", "n1-1", "n2-0"]);
    assert_eq!(b.client().documents_in(&old_index, ElementKind::Edge).len(), 1);

    // the live set keeps receiving updates after the roll
    update(&b, &mut n1, Metadata::new().with("Name", "h1c"), unix_millis(&now_millis())).await;
    let now = b.get_node(n1.id(), &GraphContext::now()).await;
    assert_eq!(revisions(&now), vec![("n1".to_string(), 2)]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_one_live_document_per_id() {
    let b = backend_with(InMemoryStoreConfig::default().with_entries_limit(5)).await;
    let mut nodes: Vec<Node> = (0..4).map(|i| host_node(&format!("n{i}"), "h", 1_000 + i)).collect();
    for n in &nodes {
        assert!(b.node_added(n).await);
    }
    for round in 0..3 {
        for (i, n) in nodes.iter_mut().enumerate() {
            let at = 2_000 + round * 100 + i as i64;
            update(&b, n, Metadata::new().with("Round", round), at).await;
        }
    }

    assert!(b.client().index_names().len() > 1);
    let live = live_documents(&b, ElementKind::Node).await;
    assert_eq!(live.len(), 4);
    assert!(live.values().all(|&count| count == 1));
}

#[tokio::test]
async fn test_relocated_live_set_does_not_retrigger_rollover() {
    let b = backend_with(InMemoryStoreConfig::default().with_entries_limit(3)).await;
    let mut nodes: Vec<Node> = (0..3).map(|i| host_node(&format!("n{i}"), "h", 1_000 + i)).collect();
    for n in &nodes {
        assert!(b.node_added(n).await);
    }
    assert_eq!(b.client().index_names().len(), 2);

    for i in 0..10 {
        update(&b, &mut nodes[0], Metadata::new().with("Seq", i), 2_000 + i * 100).await;
    }

    // one roll per three writes, none for the re-indexed live set
    assert_eq!(b.client().index_names().len(), 5);
    let live = live_documents(&b, ElementKind::Node).await;
    assert_eq!(live.len(), 3);
    assert!(live.values().all(|&count| count == 1));
}

#[tokio::test]
async fn test_edge_metadata_update_archives_previous_revision() {
    let b = backend().await;
    let mut e1 = Edge::new("e1", "n1", "n2", "agent1", Metadata::new().with("RelationType", "layer2"), t(1_000));
    assert!(b.edge_added(&e1).await);

    e1.element
        .set_metadata(Metadata::new().with("RelationType", "layer2").with("MTU", 9000), t(2_000));
    assert!(b.metadata_updated(&Element::Edge(e1.clone())).await);

    let prev = b.document(ElementKind::Edge, e1.id(), 0).await.unwrap().unwrap();
    let next = b.document(ElementKind::Edge, e1.id(), 1).await.unwrap().unwrap();
    assert_eq!(prev[FIELD_ARCHIVED_AT], json!(2_000));
    assert!(!next.contains_key(FIELD_ARCHIVED_AT));
    assert_eq!(b.tracker().get(e1.id()), Some(1));

    let current = b.get_edge(e1.id(), &GraphContext::now()).await;
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].revision(), 1);
    assert_eq!(current[0].parent.as_str(), "n1");
    assert_eq!(current[0].child.as_str(), "n2");
    assert_eq!(current[0].element.metadata.get("MTU"), Some(&json!(9000)));
}

#[tokio::test]
async fn test_archive_before_write() {
    let b = backend().await;
    let mut n1 = host_node("n1", "h1", 1_000);
    assert!(b.node_added(&n1).await);
    update(&b, &mut n1, Metadata::new().with("Name", "x"), 2_000).await;

    let prev = b.document(ElementKind::Node, n1.id(), 0).await.unwrap().unwrap();
    let next = b.document(ElementKind::Node, n1.id(), 1).await.unwrap().unwrap();
    assert_eq!(prev[FIELD_ARCHIVED_AT], json!(2_000));
    assert!(!next.contains_key(FIELD_ARCHIVED_AT));
}

#[tokio::test]
async fn test_delete_terminality() {
    let b = backend().await;
    let mut e1 = Edge::new("e1", "n1", "n2", "agent1", Metadata::new(), t(1_000));
    assert!(b.edge_added(&e1).await);

    e1.element.mark_deleted(t(5_000));
    assert!(b.edge_deleted(&e1).await);

    assert!(!b.tracker().contains(e1.id()));
    let doc = b.document(ElementKind::Edge, e1.id(), 0).await.unwrap().unwrap();
    assert_eq!(doc[FIELD_DELETED_AT], doc[FIELD_ARCHIVED_AT]);
    assert_eq!(doc[FIELD_DELETED_AT], json!(5_000));

    // further updates cannot reference the deleted element
    e1.element.set_metadata(Metadata::new(), t(6_000));
    assert!(!b.metadata_updated(&Element::Edge(e1)).await);
}

#[tokio::test]
async fn test_time_point_listing_is_unique_per_id() {
    let b = backend().await;
    let mut n1 = host_node("n1", "h1", 1_000);
    let mut n2 = host_node("n2", "h2", 1_000);
    assert!(b.node_added(&n1).await);
    assert!(b.node_added(&n2).await);
    update(&b, &mut n1, Metadata::new().with("Name", "a"), 2_000).await;
    update(&b, &mut n1, Metadata::new().with("Name", "b"), 3_000).await;
    update(&b, &mut n2, Metadata::new().with("Name", "c"), 4_000).await;

    let all = b.get_nodes(&GraphContext::history(slice(0, 5_000)), None).await;
    assert_eq!(all.len(), 5);

    let latest = b.get_nodes(&GraphContext::latest_in(slice(0, 5_000)), None).await;
    let mut got = revisions(&latest);
    got.sort();
    assert_eq!(got, vec![("n1".to_string(), 2), ("n2".to_string(), 1)]);

    let at = b.get_nodes(&GraphContext::at(t(2_500)), None).await;
    let mut got = revisions(&at);
    got.sort();
    assert_eq!(got, vec![("n1".to_string(), 1), ("n2".to_string(), 0)]);
}

#[tokio::test]
async fn test_time_point_spans_rolled_indices() {
    let b = backend().await;
    let mut n1 = host_node("n1", "h1", 1_000);
    assert!(b.node_added(&n1).await);
    update(&b, &mut n1, Metadata::new().with("Name", "a"), 2_000).await;
    b.roll_over().await.unwrap();

    let far = unix_millis(&now_millis()) + 60_000;
    let history = b.get_node(n1.id(), &GraphContext::history(slice(0, far))).await;
    assert_eq!(history.len(), 3);

    let latest = b.get_node(n1.id(), &GraphContext::latest_in(slice(0, far))).await;
    assert_eq!(revisions(&latest), vec![("n1".to_string(), 1)]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Matchers and Graph Navigation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_metadata_matcher_narrows_listing() {
    let b = backend().await;
    assert!(b.node_added(&host_node("n1", "h1", 1_000)).await);
    assert!(b.node_added(&host_node("n2", "h2", 1_100)).await);
    let veth = Node::new("n3", "agent1", Metadata::new().with("Type", "veth").with("MTU", 1500), t(1_200));
    assert!(b.node_added(&veth).await);

    let hosts = MetadataMatcher::new().with("Type", "host");
    assert_eq!(b.get_nodes(&GraphContext::now(), Some(&hosts)).await.len(), 2);

    let by_regex = MetadataMatcher::new().with("Name", "/h[0-9]/");
    assert_eq!(b.get_nodes(&GraphContext::now(), Some(&by_regex)).await.len(), 2);

    let mtu = MetadataMatcher::new().with("MTU", 1500);
    let got = b.get_nodes(&GraphContext::now(), Some(&mtu)).await;
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].id(), veth.id());

    let filter = Filter::not(Filter::term("Type", "host"));
    assert_eq!(b.get_nodes(&GraphContext::now(), Some(&filter)).await.len(), 1);
}

#[tokio::test]
async fn test_matcher_error_yields_empty_result() {
    let b = backend().await;
    assert!(b.node_added(&host_node("n1", "h1", 1_000)).await);

    let broken = MetadataMatcher::new().with("Name", "/(/");
    assert!(b.get_nodes(&GraphContext::now(), Some(&broken)).await.is_empty());

    let unsupported = MetadataMatcher::new().with("Name", json!(["a", "b"]));
    assert!(b.get_nodes(&GraphContext::now(), Some(&unsupported)).await.is_empty());
}

#[tokio::test]
async fn test_node_edges_and_edge_nodes() {
    let b = backend().await;
    let n1 = host_node("n1", "h1", 1_000);
    let n2 = Node::new("n2", "agent1", Metadata::new().with("Type", "veth"), t(1_000));
    let n3 = host_node("n3", "h3", 1_000);
    for n in [&n1, &n2, &n3] {
        assert!(b.node_added(n).await);
    }
    let e12 = Edge::new("e12", "n1", "n2", "agent1", Metadata::new().with("RelationType", "ownership"), t(1_100));
    let e23 = Edge::new("e23", "n2", "n3", "agent1", Metadata::new().with("RelationType", "layer2"), t(1_200));
    assert!(b.edge_added(&e12).await);
    assert!(b.edge_added(&e23).await);

    let around_n2 = b.get_node_edges(&n2, &GraphContext::now(), None).await;
    assert_eq!(around_n2.len(), 2);

    let layer2 = MetadataMatcher::new().with("RelationType", "layer2");
    let only = b.get_node_edges(&n2, &GraphContext::now(), Some(&layer2)).await;
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].id(), e23.id());

    let (parents, children) = b.get_edge_nodes(&e12, &GraphContext::now(), None, None).await;
    assert_eq!(revisions(&parents), vec![("n1".to_string(), 0)]);
    assert_eq!(revisions(&children), vec![("n2".to_string(), 0)]);

    let hosts = MetadataMatcher::new().with("Type", "host");
    let (parents, children) = b.get_edge_nodes(&e12, &GraphContext::now(), Some(&hosts), Some(&hosts)).await;
    assert_eq!(parents.len(), 1);
    assert!(children.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure Handling
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_undecodable_hit_is_dropped() {
    let b = backend().await;
    assert!(b.node_added(&host_node("n1", "h1", 1_000)).await);

    let garbage = json!({"ID": 42, "Metadata": {}}).as_object().cloned().unwrap();
    b.client().bulk_index(ElementKind::Node, "junk-0", garbage).await.unwrap();

    let got = b.get_nodes(&GraphContext::now(), None).await;
    assert_eq!(revisions(&got), vec![("n1".to_string(), 0)]);
}

#[tokio::test]
async fn test_store_failure_on_query_yields_empty_result() {
    let b = backend().await;
    assert!(b.node_added(&host_node("n1", "h1", 1_000)).await);

    b.client().fail_next(StoreOp::Search);
    assert!(b.get_nodes(&GraphContext::now(), None).await.is_empty());
    assert_eq!(b.get_nodes(&GraphContext::now(), None).await.len(), 1);
}

#[tokio::test]
async fn test_rollover_failure_fails_triggering_write() {
    let b = backend_with(InMemoryStoreConfig::default().with_entries_limit(2)).await;
    assert!(b.node_added(&host_node("n1", "h1", 1_000)).await);

    b.client().fail_next(StoreOp::RollIndex);
    assert!(!b.node_added(&host_node("n2", "h2", 1_100)).await);
    assert_eq!(b.client().index_names().len(), 1);
}

#[tokio::test]
async fn test_usable_as_trait_object() {
    let b: Arc<dyn GraphBackend> = Arc::new(backend().await);
    assert!(b.is_history_supported());
    assert!(b.node_added(&host_node("n1", "h1", 1_000)).await);
    assert_eq!(b.get_nodes(&GraphContext::now(), None).await.len(), 1);
}
