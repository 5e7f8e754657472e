//! Topology Replay Binary
//!
//! Replays a JSON-lines stream of topology events and queries against the
//! history backend, backed by the in-memory store, and prints one JSON
//! result line per input line.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `TOPOLOGY_INDEX_PREFIX`, `TOPOLOGY_INDEX_ENTRIES_LIMIT`,
//!   `TOPOLOGY_INDEX_AGE_LIMIT_SECS`, `TOPOLOGY_INDICES_TO_KEEP`: store settings
//! - `TOPOLOGY_RESTORE_REVISION_ON_DELETE_FAILURE`: backend settings
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! Logs go to stderr, results to stdout.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin topology_replay --features cli -- events.jsonl
//! echo '{"op":"get_nodes"}' | cargo run --bin topology_replay --features cli
//! ```

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use topology_history::{
    BackendConfig, Edge, Element, GraphBackend, GraphContext, HistoryBackend, Identifier,
    InMemoryStoreClient, MetadataMatcher, Node,
};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "topology_replay=info,topology_history=info".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// One line of the replay stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ReplayEvent {
    NodeAdded { node: Node },
    NodeDeleted { node: Node },
    EdgeAdded { edge: Edge },
    EdgeDeleted { edge: Edge },
    MetadataUpdated { element: Element },
    Roll,
    GetNode {
        id: Identifier,
        #[serde(default = "GraphContext::now")]
        context: GraphContext,
    },
    GetEdge {
        id: Identifier,
        #[serde(default = "GraphContext::now")]
        context: GraphContext,
    },
    GetNodes {
        #[serde(default = "GraphContext::now")]
        context: GraphContext,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    GetEdges {
        #[serde(default = "GraphContext::now")]
        context: GraphContext,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
}

fn matcher(metadata: Map<String, Value>) -> MetadataMatcher {
    metadata
        .into_iter()
        .fold(MetadataMatcher::new(), |m, (key, value)| m.with(key, value))
}

async fn apply(backend: &HistoryBackend<InMemoryStoreClient>, event: ReplayEvent) -> Value {
    match event {
        ReplayEvent::NodeAdded { node } => json!({ "ok": backend.node_added(&node).await }),
        ReplayEvent::NodeDeleted { node } => json!({ "ok": backend.node_deleted(&node).await }),
        ReplayEvent::EdgeAdded { edge } => json!({ "ok": backend.edge_added(&edge).await }),
        ReplayEvent::EdgeDeleted { edge } => json!({ "ok": backend.edge_deleted(&edge).await }),
        ReplayEvent::MetadataUpdated { element } => {
            json!({ "ok": backend.metadata_updated(&element).await })
        }
        ReplayEvent::Roll => match backend.roll_over().await {
            Ok(()) => json!({ "ok": true, "live_index": backend.client().live_index() }),
            Err(e) => json!({ "ok": false, "error": e.to_string() }),
        },
        ReplayEvent::GetNode { id, context } => json!({ "nodes": backend.get_node(&id, &context).await }),
        ReplayEvent::GetEdge { id, context } => json!({ "edges": backend.get_edge(&id, &context).await }),
        ReplayEvent::GetNodes { context, metadata } => {
            let m = matcher(metadata);
            json!({ "nodes": backend.get_nodes(&context, Some(&m)).await })
        }
        ReplayEvent::GetEdges { context, metadata } => {
            let m = matcher(metadata);
            json!({ "edges": backend.get_edges(&context, Some(&m)).await })
        }
    }
}

async fn replay<R>(backend: &HistoryBackend<InMemoryStoreClient>, input: R) -> Result<usize, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        count += 1;
        let result = match serde_json::from_str::<ReplayEvent>(line) {
            Ok(event) => apply(backend, event).await,
            Err(e) => {
                tracing::warn!(line = count, error = %e, "Skipping malformed event");
                json!({ "ok": false, "error": e.to_string() })
            }
        };
        println!("{result}");
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting topology replay");

    let client = Arc::new(InMemoryStoreClient::from_env());
    let backend = HistoryBackend::new(client, BackendConfig::from_env()).await?;

    let count = match std::env::args().nth(1) {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            replay(&backend, BufReader::new(file)).await?
        }
        None => replay(&backend, BufReader::new(tokio::io::stdin())).await?,
    };

    info!(
        events = count,
        tracked = backend.tracker().len(),
        indices = backend.client().index_names().len(),
        "Replay complete"
    );
    Ok(())
}
