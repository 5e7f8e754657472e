//! Revision tracker: last written revision per element.
//!
//! An entry exists exactly while the element has a live, non-deleted
//! document. Entries are spread over independently locked shards so that
//! writers touching different IDs do not contend.

use std::collections::HashMap;

use parking_lot::Mutex;
use xxhash_rust::xxh64::xxh64;

use crate::types::Identifier;

/// Default shard count.
pub const DEFAULT_SHARDS: usize = 16;

/// Concurrent map from element ID to its last written revision.
#[derive(Debug)]
pub struct RevisionTracker {
    shards: Box<[Mutex<HashMap<Identifier, i64>>]>,
}

impl RevisionTracker {
    /// Create a tracker with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a tracker with `shards` shards (at least one).
    pub fn with_shards(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, id: &Identifier) -> &Mutex<HashMap<Identifier, i64>> {
        let idx = xxh64(id.as_str().as_bytes(), 0) % self.shards.len() as u64;
        &self.shards[idx as usize]
    }

    /// Record `revision` as the last written revision of `id`.
    ///
    /// Returns the previously recorded revision.
    pub fn record(&self, id: &Identifier, revision: i64) -> Option<i64> {
        self.shard(id).lock().insert(id.clone(), revision)
    }

    /// Last written revision of `id`.
    pub fn get(&self, id: &Identifier) -> Option<i64> {
        self.shard(id).lock().get(id).copied()
    }

    /// Forget `id`, returning its last revision.
    pub fn remove(&self, id: &Identifier) -> Option<i64> {
        self.shard(id).lock().remove(id)
    }

    /// Whether `id` has a recorded revision.
    pub fn contains(&self, id: &Identifier) -> bool {
        self.shard(id).lock().contains_key(id)
    }

    /// Number of tracked IDs.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    /// Sorted copy of every entry.
    pub fn snapshot(&self) -> Vec<(Identifier, i64)> {
        let mut entries: Vec<_> = self
            .shards
            .iter()
            .flat_map(|s| {
                s.lock()
                    .iter()
                    .map(|(id, rev)| (id.clone(), *rev))
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort();
        entries
    }
}

impl Default for RevisionTracker {
    fn default() -> Self {
        Self::new()
    }
}
