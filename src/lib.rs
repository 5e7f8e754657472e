//! # topology-history
//!
//! Revisioned persistence and time-travel queries for a live topology graph.
//!
//! The backend answers two questions:
//!
//! > What does the graph look like **now**?
//! > What did it look like at time **T**, or across `[T1, T2]`?
//!
//! ## Core Contract
//!
//! 1. Every topology mutation is written as an immutable document keyed `<ID>-<Revision>`
//! 2. At most one document per ID is live (no `ArchivedAt`) at any time
//! 3. Rollover relocates the live set into a fresh index without changing revisions
//!
//! ## Architecture
//!
//! ```text
//! Live graph events → ElementMapper → HistoryBackend → StoreClient (memory or remote)
//!                                          ↓      ↑
//!                                 RevisionTracker  Rollover
//!
//! Queries → TimedSearchQuery (time ∧ identity ∧ metadata) → StoreClient::search
//!         → decode → point-in-time dedup
//! ```
//!
//! ## Time Semantics
//!
//! - No time slice: the live index alias, live documents only
//! - Time slice `[start, last]`: every index, documents valid somewhere in the slice
//! - Time point: one revision per ID (the latest)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod filter;
pub mod matcher;
pub mod mapper;
pub mod tracker;
pub mod store;
pub mod backend;
pub mod history;

// Re-exports
pub use types::{
    Identifier, ElementKind, Metadata, GraphElement, Node, Edge, Element,
    TimeSlice, GraphContext, unix_millis, from_unix_millis, now_millis,
};
pub use filter::{Filter, FilterError, RangeOp};
pub use matcher::{ElementMatcher, MetadataMatcher, MatcherError};
pub use mapper::DecodeError;
pub use tracker::RevisionTracker;
pub use store::{
    StoreClient, Document, SearchHit, SortSpec,
    InMemoryStoreClient, InMemoryStoreConfig, InMemoryError, StoreOp,
};
pub use backend::GraphBackend;
pub use history::{HistoryBackend, HistoryError, BackendConfig};
pub use history::query::{TimedSearchQuery, time_filter, node_edges_filter};
