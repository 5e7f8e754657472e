//! Filter expressions over persisted documents.
//!
//! A [`Filter`] is a small boolean expression tree over document fields.
//! Field names are dotted paths (`Metadata.Name`) resolved through nested
//! JSON objects. The same tree can be evaluated in process against a
//! document ([`Filter::eval`]) or rendered as an Elasticsearch-style bool
//! query ([`Filter::to_query_dsl`]) for remote stores.

use serde_json::{json, Map, Value};

/// Error building a filter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FilterError {
    /// The regular expression does not compile.
    #[error("Invalid regex for field {key}: {message}")]
    InvalidRegex {
        /// Field the regex applies to.
        key: String,
        /// Compiler message.
        message: String,
    },
}

/// Comparison operator of a range filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl RangeOp {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }

    fn holds(&self, actual: f64, bound: f64) -> bool {
        match self {
            Self::Gt => actual > bound,
            Self::Gte => actual >= bound,
            Self::Lt => actual < bound,
            Self::Lte => actual <= bound,
        }
    }
}

/// Boolean filter expression.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Field equals a string, number or boolean.
    Term {
        /// Field path.
        key: String,
        /// Expected value.
        value: Value,
    },
    /// String field fully matches a regular expression.
    Regex {
        /// Field path.
        key: String,
        /// Pattern as written by the caller.
        pattern: String,
        /// Anchored, compiled pattern.
        compiled: regex_lite::Regex,
    },
    /// Numeric field compared against a bound.
    Range {
        /// Field path.
        key: String,
        /// Comparison.
        op: RangeOp,
        /// Bound.
        value: i64,
    },
    /// Field is absent or null.
    Null {
        /// Field path.
        key: String,
    },
    /// Every sub-filter holds.
    And(Vec<Filter>),
    /// At least one sub-filter holds.
    Or(Vec<Filter>),
    /// The sub-filter does not hold.
    Not(Box<Filter>),
}

impl Filter {
    /// Equality on any scalar value.
    pub fn term(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Term { key: key.into(), value: value.into() }
    }

    /// Full-string regular expression match.
    pub fn regex(key: impl Into<String>, pattern: impl Into<String>) -> Result<Self, FilterError> {
        let key = key.into();
        let pattern = pattern.into();
        let compiled = regex_lite::Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            FilterError::InvalidRegex { key: key.clone(), message: e.to_string() }
        })?;
        Ok(Self::Regex { key, pattern, compiled })
    }

    /// `key > value`.
    pub fn gt(key: impl Into<String>, value: i64) -> Self {
        Self::Range { key: key.into(), op: RangeOp::Gt, value }
    }

    /// `key >= value`.
    pub fn gte(key: impl Into<String>, value: i64) -> Self {
        Self::Range { key: key.into(), op: RangeOp::Gte, value }
    }

    /// `key < value`.
    pub fn lt(key: impl Into<String>, value: i64) -> Self {
        Self::Range { key: key.into(), op: RangeOp::Lt, value }
    }

    /// `key <= value`.
    pub fn lte(key: impl Into<String>, value: i64) -> Self {
        Self::Range { key: key.into(), op: RangeOp::Lte, value }
    }

    /// Field absent.
    pub fn null(key: impl Into<String>) -> Self {
        Self::Null { key: key.into() }
    }

    /// Conjunction.
    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And(filters)
    }

    /// Disjunction.
    pub fn or(filters: Vec<Filter>) -> Self {
        Self::Or(filters)
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Conjunction of whatever filters are present.
    ///
    /// Zero filters yields `None` (an unconstrained query), one filter is
    /// returned as is.
    pub fn all_of(filters: Vec<Filter>) -> Option<Self> {
        let mut filters = filters;
        match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Self::And(filters)),
        }
    }

    /// Copy of this filter with every field path prefixed by `prefix.`.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self.clone();
        }
        let p = |key: &str| format!("{prefix}.{key}");
        match self {
            Self::Term { key, value } => Self::Term { key: p(key), value: value.clone() },
            Self::Regex { key, pattern, compiled } => Self::Regex {
                key: p(key),
                pattern: pattern.clone(),
                compiled: compiled.clone(),
            },
            Self::Range { key, op, value } => Self::Range { key: p(key), op: *op, value: *value },
            Self::Null { key } => Self::Null { key: p(key) },
            Self::And(fs) => Self::And(fs.iter().map(|f| f.with_prefix(prefix)).collect()),
            Self::Or(fs) => Self::Or(fs.iter().map(|f| f.with_prefix(prefix)).collect()),
            Self::Not(f) => Self::Not(Box::new(f.with_prefix(prefix))),
        }
    }

    /// Evaluate against a document.
    ///
    /// A term, regex or range on an array-valued field holds if any element
    /// satisfies it.
    pub fn eval(&self, doc: &Map<String, Value>) -> bool {
        match self {
            Self::Term { key, value } => {
                any_scalar(resolve(doc, key), |v| values_equal(v, value))
            }
            Self::Regex { key, compiled, .. } => any_scalar(resolve(doc, key), |v| {
                v.as_str().map(|s| compiled.is_match(s)).unwrap_or(false)
            }),
            Self::Range { key, op, value } => any_scalar(resolve(doc, key), |v| {
                v.as_f64().map(|n| op.holds(n, *value as f64)).unwrap_or(false)
            }),
            Self::Null { key } => matches!(resolve(doc, key), None | Some(Value::Null)),
            Self::And(fs) => fs.iter().all(|f| f.eval(doc)),
            Self::Or(fs) => fs.iter().any(|f| f.eval(doc)),
            Self::Not(f) => !f.eval(doc),
        }
    }

    /// Render as an Elasticsearch-style query fragment.
    pub fn to_query_dsl(&self) -> Value {
        match self {
            Self::Term { key, value } => json!({ "term": { key.as_str(): value } }),
            Self::Regex { key, pattern, .. } => json!({ "regexp": { key.as_str(): pattern } }),
            Self::Range { key, op, value } => {
                json!({ "range": { key.as_str(): { op.as_str(): value } } })
            }
            Self::Null { key } => {
                json!({ "bool": { "must_not": [ { "exists": { "field": key } } ] } })
            }
            Self::And(fs) => {
                let must: Vec<Value> = fs.iter().map(Filter::to_query_dsl).collect();
                json!({ "bool": { "must": must } })
            }
            Self::Or(fs) => {
                let should: Vec<Value> = fs.iter().map(Filter::to_query_dsl).collect();
                json!({ "bool": { "should": should, "minimum_should_match": 1 } })
            }
            Self::Not(f) => json!({ "bool": { "must_not": [ f.to_query_dsl() ] } }),
        }
    }
}

/// Resolve a dotted path through nested objects.
pub(crate) fn resolve<'a>(doc: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(v) = doc.get(path) {
        return Some(v);
    }
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn any_scalar(value: Option<&Value>, pred: impl Fn(&Value) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) => items.iter().any(pred),
        Some(v) => pred(v),
        None => false,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => actual == expected,
    }
}
