//! Document store capability consumed by the history backend.

pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::filter::Filter;
use crate::types::ElementKind;

/// A persisted document: flat field map with nested metadata.
pub type Document = Map<String, Value>;

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Concrete index the document lives in.
    pub index: String,
    /// Document identifier (`<ID>-<Revision>`).
    pub id: String,
    /// Stored document.
    pub source: Value,
}

/// Ascending sort on a numeric field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Field to sort on.
    pub field: String,
}

impl SortSpec {
    /// Ascending sort on `field`.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

/// Trait for document store backends.
///
/// Writes target the live index (the alias returned by [`index_alias`]).
/// Searches either target one index or alias, or span every index when no
/// index is given. Implementations own their timeouts; any failure is
/// reported through [`StoreClient::Error`].
///
/// [`index_alias`]: StoreClient::index_alias
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lifecycle hook, called once before first use.
    async fn start(&self) -> Result<(), Self::Error>;

    /// Fetch a document from the live index.
    async fn get(&self, kind: ElementKind, id: &str) -> Result<Option<Document>, Self::Error>;

    /// Index a document into the live index.
    ///
    /// Returns `true` when the live index has crossed its rollover threshold.
    async fn bulk_index(&self, kind: ElementKind, id: &str, doc: Document) -> Result<bool, Self::Error>;

    /// Copy a live document into a freshly rolled index.
    ///
    /// Relocated documents must not count toward the rollover threshold.
    /// The default delegates to `bulk_index` and drops its signal.
    async fn reindex(&self, kind: ElementKind, id: &str, doc: Document) -> Result<(), Self::Error> {
        self.bulk_index(kind, id, doc).await.map(|_| ())
    }

    /// Merge `patch` into an existing document of the live index.
    async fn bulk_update_with_partial_doc(
        &self,
        kind: ElementKind,
        id: &str,
        patch: Document,
    ) -> Result<(), Self::Error>;

    /// Create a new index and make it the live target.
    async fn roll_index(&self) -> Result<(), Self::Error>;

    /// Search documents of `kind` matching `filter`.
    ///
    /// `filter = None` matches everything, `index = None` spans all indices.
    async fn search(
        &self,
        kind: ElementKind,
        filter: Option<&Filter>,
        index: Option<&str>,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<SearchHit>, Self::Error>;

    /// Turn a filter into a store query fragment rooted at `prefix`.
    fn format_filter(&self, filter: Option<&Filter>, prefix: &str) -> Option<Filter> {
        filter.map(|f| f.with_prefix(prefix))
    }

    /// Name of the live index alias.
    fn index_alias(&self) -> String;
}

pub use memory::{InMemoryStoreClient, InMemoryStoreConfig, InMemoryError, StoreOp};
