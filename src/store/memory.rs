//! In-memory document store with rolling indices.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `TOPOLOGY_INDEX_PREFIX`: index name prefix (default: topology)
//! - `TOPOLOGY_INDEX_ENTRIES_LIMIT`: documents written since the last roll before rollover (default: 0 = unlimited)
//! - `TOPOLOGY_INDEX_AGE_LIMIT_SECS`: index age before rollover (default: 0 = unlimited)
//! - `TOPOLOGY_INDICES_TO_KEEP`: indices retained after a roll (default: 0 = all)

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::filter::{resolve, Filter};
use crate::types::ElementKind;
use super::{Document, SearchHit, SortSpec, StoreClient};

/// Configuration for the in-memory store.
#[derive(Debug, Clone)]
pub struct InMemoryStoreConfig {
    /// Prefix of index and alias names.
    pub index_prefix: String,
    /// Documents written since the last roll that trigger a rollover signal
    /// (0 = never). Relocated documents are not counted.
    pub entries_limit: usize,
    /// Live index age in seconds that triggers a rollover signal (0 = never).
    pub age_limit_secs: u64,
    /// Number of indices kept after a roll (0 = keep all).
    pub indices_to_keep: usize,
}

impl InMemoryStoreConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            index_prefix: std::env::var("TOPOLOGY_INDEX_PREFIX")
                .unwrap_or(defaults.index_prefix),
            entries_limit: std::env::var("TOPOLOGY_INDEX_ENTRIES_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.entries_limit),
            age_limit_secs: std::env::var("TOPOLOGY_INDEX_AGE_LIMIT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.age_limit_secs),
            indices_to_keep: std::env::var("TOPOLOGY_INDICES_TO_KEEP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.indices_to_keep),
        }
    }

    /// Set the entries limit.
    pub fn with_entries_limit(mut self, limit: usize) -> Self {
        self.entries_limit = limit;
        self
    }

    /// Set the number of indices kept after a roll.
    pub fn with_indices_to_keep(mut self, keep: usize) -> Self {
        self.indices_to_keep = keep;
        self
    }
}

impl Default for InMemoryStoreConfig {
    fn default() -> Self {
        Self {
            index_prefix: "topology".to_string(),
            entries_limit: 0,
            age_limit_secs: 0,
            indices_to_keep: 0,
        }
    }
}

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// [`StoreClient::get`].
    Get,
    /// [`StoreClient::bulk_index`].
    BulkIndex,
    /// [`StoreClient::bulk_update_with_partial_doc`].
    BulkUpdate,
    /// [`StoreClient::roll_index`].
    RollIndex,
    /// [`StoreClient::search`].
    Search,
}

/// Error type for the in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Failure injected with [`InMemoryStoreClient::fail_next`].
    #[error("Injected failure during {0:?}")]
    Injected(StoreOp),
    /// Partial update of a document absent from the live index.
    #[error("Document not found in live index: {kind} {id}")]
    DocumentNotFound {
        /// Document kind.
        kind: ElementKind,
        /// Document id.
        id: String,
    },
    /// Search on an unknown index.
    #[error("Index not found: {0}")]
    IndexNotFound(String),
}

#[derive(Debug)]
struct Index {
    name: String,
    created: Instant,
    /// Documents indexed through `bulk_index`, relocations excluded.
    written: usize,
    docs: BTreeMap<(ElementKind, String), Document>,
}

impl Index {
    fn new(name: String) -> Self {
        Self { name, created: Instant::now(), written: 0, docs: BTreeMap::new() }
    }
}

#[derive(Debug)]
struct State {
    /// Oldest first; the last one is live.
    indices: Vec<Index>,
    sequence: u64,
}

impl State {
    fn live(&self) -> &Index {
        // never empty: created with one index and retention keeps the live one
        &self.indices[self.indices.len() - 1]
    }

    fn live_mut(&mut self) -> &mut Index {
        let last = self.indices.len() - 1;
        &mut self.indices[last]
    }
}

/// Document store kept in process memory.
///
/// Models the rolling-index layout of a search store: documents are written
/// to the live index behind an alias, rollover creates a fresh index and
/// repoints the alias, and unscoped searches span every retained index.
#[derive(Debug)]
pub struct InMemoryStoreClient {
    config: InMemoryStoreConfig,
    state: RwLock<State>,
    faults: Mutex<HashSet<StoreOp>>,
}

impl InMemoryStoreClient {
    /// Create a store holding one empty live index.
    pub fn new(config: InMemoryStoreConfig) -> Self {
        let first = Self::index_name(&config.index_prefix, 1);
        Self {
            config,
            state: RwLock::new(State { indices: vec![Index::new(first)], sequence: 1 }),
            faults: Mutex::new(HashSet::new()),
        }
    }

    /// Create a store from environment variables.
    pub fn from_env() -> Self {
        Self::new(InMemoryStoreConfig::from_env())
    }

    fn index_name(prefix: &str, sequence: u64) -> String {
        format!("{prefix}_v{sequence:06}")
    }

    /// Make the next call to `op` fail.
    pub fn fail_next(&self, op: StoreOp) {
        self.faults.lock().insert(op);
    }

    fn check_fault(&self, op: StoreOp) -> Result<(), InMemoryError> {
        if self.faults.lock().remove(&op) {
            return Err(InMemoryError::Injected(op));
        }
        Ok(())
    }

    /// Names of retained indices, oldest first.
    pub fn index_names(&self) -> Vec<String> {
        self.state.read().indices.iter().map(|i| i.name.clone()).collect()
    }

    /// Name of the concrete index the alias points to.
    pub fn live_index(&self) -> String {
        self.state.read().live().name.clone()
    }

    /// Documents of `kind` held by the named index, in id order.
    pub fn documents_in(&self, index: &str, kind: ElementKind) -> Vec<(String, Document)> {
        let state = self.state.read();
        state
            .indices
            .iter()
            .find(|i| i.name == index)
            .map(|i| {
                i.docs
                    .iter()
                    .filter(|((k, _), _)| *k == kind)
                    .map(|((_, id), doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn should_roll(&self, live: &Index) -> bool {
        let by_entries = self.config.entries_limit > 0 && live.written >= self.config.entries_limit;
        let by_age = self.config.age_limit_secs > 0
            && live.created.elapsed() >= Duration::from_secs(self.config.age_limit_secs);
        by_entries || by_age
    }
}

impl Default for InMemoryStoreClient {
    fn default() -> Self {
        Self::new(InMemoryStoreConfig::default())
    }
}

fn sort_key<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    doc.as_object()
        .and_then(|d| resolve(d, field))
        .filter(|v| v.is_number())
}

/// Numeric order, exact on integers; missing values first.
fn compare_keys(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal),
        },
    }
}

#[async_trait]
impl StoreClient for InMemoryStoreClient {
    type Error = InMemoryError;

    async fn start(&self) -> Result<(), Self::Error> {
        tracing::info!(
            live_index = %self.live_index(),
            alias = %self.index_alias(),
            entries_limit = self.config.entries_limit,
            age_limit_secs = self.config.age_limit_secs,
            indices_to_keep = self.config.indices_to_keep,
            "In-memory store started"
        );
        Ok(())
    }

    async fn get(&self, kind: ElementKind, id: &str) -> Result<Option<Document>, Self::Error> {
        self.check_fault(StoreOp::Get)?;
        Ok(self.state.read().live().docs.get(&(kind, id.to_string())).cloned())
    }

    async fn bulk_index(&self, kind: ElementKind, id: &str, doc: Document) -> Result<bool, Self::Error> {
        self.check_fault(StoreOp::BulkIndex)?;
        let mut state = self.state.write();
        let live = state.live_mut();
        live.docs.insert((kind, id.to_string()), doc);
        live.written += 1;
        Ok(self.should_roll(state.live()))
    }

    async fn reindex(&self, kind: ElementKind, id: &str, doc: Document) -> Result<(), Self::Error> {
        self.check_fault(StoreOp::BulkIndex)?;
        self.state.write().live_mut().docs.insert((kind, id.to_string()), doc);
        Ok(())
    }

    async fn bulk_update_with_partial_doc(
        &self,
        kind: ElementKind,
        id: &str,
        patch: Document,
    ) -> Result<(), Self::Error> {
        self.check_fault(StoreOp::BulkUpdate)?;
        let mut state = self.state.write();
        let doc = state
            .live_mut()
            .docs
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| InMemoryError::DocumentNotFound { kind, id: id.to_string() })?;
        for (field, value) in patch {
            doc.insert(field, value);
        }
        Ok(())
    }

    async fn roll_index(&self) -> Result<(), Self::Error> {
        self.check_fault(StoreOp::RollIndex)?;
        let mut state = self.state.write();
        state.sequence += 1;
        let name = Self::index_name(&self.config.index_prefix, state.sequence);
        state.indices.push(Index::new(name.clone()));

        let keep = self.config.indices_to_keep;
        if keep > 0 && state.indices.len() > keep {
            let excess = state.indices.len() - keep;
            let dropped: Vec<String> = state.indices.drain(..excess).map(|i| i.name).collect();
            tracing::debug!(dropped = ?dropped, "Dropped indices beyond retention");
        }

        tracing::debug!(live_index = %name, "Alias repointed to new index");
        Ok(())
    }

    async fn search(
        &self,
        kind: ElementKind,
        filter: Option<&Filter>,
        index: Option<&str>,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<SearchHit>, Self::Error> {
        self.check_fault(StoreOp::Search)?;
        let state = self.state.read();
        let alias = self.index_alias();

        let scanned: Vec<&Index> = match index {
            None => state.indices.iter().collect(),
            Some(name) if name == alias => vec![state.live()],
            Some(name) => vec![state
                .indices
                .iter()
                .find(|i| i.name == name)
                .ok_or_else(|| InMemoryError::IndexNotFound(name.to_string()))?],
        };

        let mut hits: Vec<SearchHit> = scanned
            .into_iter()
            .flat_map(|index| {
                index
                    .docs
                    .iter()
                    .filter(move |((k, _), doc)| *k == kind && filter.map_or(true, |f| f.eval(doc)))
                    .map(move |((_, id), doc)| SearchHit {
                        index: index.name.clone(),
                        id: id.clone(),
                        source: Value::Object(doc.clone()),
                    })
            })
            .collect();

        if let Some(sort) = sort {
            // stable: equal keys keep index-then-id order
            hits.sort_by(|a, b| compare_keys(sort_key(&a.source, &sort.field), sort_key(&b.source, &sort.field)));
        }

        Ok(hits)
    }

    fn index_alias(&self) -> String {
        format!("{}_live", self.config.index_prefix)
    }
}
