//! Metadata predicates used to narrow node and edge queries.

use serde_json::Value;

use crate::filter::{Filter, FilterError};
use crate::types::Metadata;

/// Error building a metadata predicate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MatcherError {
    /// A filter component could not be built.
    #[error("Invalid metadata filter: {0}")]
    Filter(#[from] FilterError),
    /// Any other predicate-specific failure.
    #[error("Invalid metadata predicate: {0}")]
    Invalid(String),
}

/// Capability producing a metadata filter.
///
/// Filters returned here use field paths relative to the metadata map; the
/// query engine prefixes them before they reach the store.
pub trait ElementMatcher: Send + Sync {
    /// Filter selecting matching metadata, or `None` to match everything.
    fn filter(&self) -> Result<Option<Filter>, MatcherError>;

    /// Evaluate the predicate in memory.
    ///
    /// A predicate that fails to build matches nothing.
    fn matches(&self, metadata: &Metadata) -> bool {
        match self.filter() {
            Ok(None) => true,
            Ok(Some(f)) => f.eval(&metadata.to_json_map()),
            Err(_) => false,
        }
    }
}

impl ElementMatcher for Filter {
    fn filter(&self) -> Result<Option<Filter>, MatcherError> {
        Ok(Some(self.clone()))
    }
}

/// Matches metadata containing every listed key/value pair.
///
/// Nested objects are matched field by field. A string value written as
/// `/pattern/` is matched as a regular expression.
#[derive(Debug, Clone, Default)]
pub struct MetadataMatcher {
    pairs: Vec<(String, Value)>,
}

impl MetadataMatcher {
    /// Empty matcher, matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to equal (or match) `value`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }
}

impl ElementMatcher for MetadataMatcher {
    fn filter(&self) -> Result<Option<Filter>, MatcherError> {
        let mut filters = Vec::new();
        for (key, value) in &self.pairs {
            collect_filters(key, value, &mut filters)?;
        }
        Ok(Filter::all_of(filters))
    }
}

fn collect_filters(key: &str, value: &Value, out: &mut Vec<Filter>) -> Result<(), MatcherError> {
    match value {
        Value::Object(map) => {
            for (sub, v) in map {
                collect_filters(&format!("{key}.{sub}"), v, out)?;
            }
        }
        Value::String(s) if s.len() >= 2 && s.starts_with('/') && s.ends_with('/') => {
            out.push(Filter::regex(key, &s[1..s.len() - 1])?);
        }
        Value::Array(_) | Value::Null => {
            return Err(MatcherError::Invalid(format!("unsupported value for {key}: {value}")));
        }
        _ => out.push(Filter::term(key, value.clone())),
    }
    Ok(())
}
