use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;

/// Timestamp type (milliseconds since epoch).
pub type Timestamp = i64;

/// Value type.
pub type Value = f64;

/// TagSet type (using a HashMap for flexibility).
pub type TagSet = HashMap<String, String>;

/// A single (timestamp, value) sample of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: Timestamp,
    pub value: Value,
}

impl DataPoint {
    pub fn new(timestamp: Timestamp, value: Value) -> Self {
        Self { timestamp, value }
    }
}

/// Statistical summary of all samples that fell in `[start, end)`.
///
/// When `empty` is true no sample fell in the bucket and every numeric field is zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatBucket {
    pub start: Timestamp,
    pub end: Timestamp,
    pub empty: bool,
    pub samples: u64,
    pub min: Value,
    pub max: Value,
    pub first: Value,
    pub last: Value,
    pub avg: Value,
    pub sum: Value,
}

impl StatBucket {
    /// A placeholder bucket for a gap with no samples.
    pub fn empty(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start,
            end,
            empty: true,
            ..Default::default()
        }
    }
}

/// A tenant identifier as returned by tenant listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
}

/// Listing view of one metric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tags: TagSet,
    /// Most recent ingested point(s); a single element for series that received data.
    #[serde(rename = "data", default, skip_serializing_if = "Vec::is_empty")]
    pub last_values: Vec<DataPoint>,
}

/// The only metric kind stored by the ring-buffer engine.
pub const GAUGE: &str = "gauge";

/// Result ordering for range and statistics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Order {
    Asc,
    Desc,
}

impl FromStr for Order {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(Order::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(Order::Desc)
        } else {
            Err(StorageError::InvalidOrder(s.to_string()))
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::Asc => f.write_str("ASC"),
            Order::Desc => f.write_str("DESC"),
        }
    }
}
