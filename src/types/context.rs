//! Query context: time slices, time points and millisecond time helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub fn unix_millis(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Timestamp from milliseconds since the Unix epoch.
pub fn from_unix_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Current time truncated to millisecond precision.
///
/// Documents store timestamps as epoch milliseconds, so values produced here
/// survive a write/read cycle unchanged.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    from_unix_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Closed time interval `[start, last]` scoping a historical query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlice {
    /// Inclusive lower bound.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    /// Inclusive upper bound.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last: DateTime<Utc>,
}

impl TimeSlice {
    /// Create a slice; bounds are swapped if given in reverse.
    pub fn new(start: DateTime<Utc>, last: DateTime<Utc>) -> Self {
        if start <= last {
            Self { start, last }
        } else {
            Self { start: last, last: start }
        }
    }

    /// Degenerate slice covering a single instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self { start: instant, last: instant }
    }

    /// Lower bound in epoch milliseconds.
    pub fn start_millis(&self) -> i64 {
        unix_millis(&self.start)
    }

    /// Upper bound in epoch milliseconds.
    pub fn last_millis(&self) -> i64 {
        unix_millis(&self.last)
    }
}

/// Temporal scope of a read request.
///
/// - no slice, time point: the live graph as of now
/// - slice, no time point: every revision valid at some moment of the slice
/// - slice, time point: one row per ID, the latest revision within the slice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphContext {
    /// Optional historical interval.
    #[serde(default)]
    pub time_slice: Option<TimeSlice>,
    /// Collapse results to one revision per ID.
    #[serde(default)]
    pub time_point: bool,
}

impl GraphContext {
    /// Live view of the graph.
    pub fn now() -> Self {
        Self { time_slice: None, time_point: true }
    }

    /// Every document in the live index, without deduplication.
    pub fn unscoped() -> Self {
        Self { time_slice: None, time_point: false }
    }

    /// Full history overlapping `slice`.
    pub fn history(slice: TimeSlice) -> Self {
        Self { time_slice: Some(slice), time_point: false }
    }

    /// Graph as it was at `instant`.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self { time_slice: Some(TimeSlice::at(instant)), time_point: true }
    }

    /// Latest revision per ID within `slice`.
    pub fn latest_in(slice: TimeSlice) -> Self {
        Self { time_slice: Some(slice), time_point: true }
    }
}
