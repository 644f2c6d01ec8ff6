#![doc = include_str!("../README.md")]
// Declare modules
pub mod backend;
pub mod core;
pub mod error;
pub mod example;
pub mod index;
pub mod query;
pub mod series;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod utils;

/// Storage contract implemented by every backend.
pub use crate::backend::{open_backend, Storage};
/// Configuration options for the in-memory engine.
pub use crate::core::StorageConfig;
/// In-memory ring-buffer engine.
pub use crate::core::MemoryStorage;
/// Error type for storage operations.
pub use crate::error::StorageError;
/// Synthetic backend returning random data.
pub use crate::example::ExampleStorage;
/// Structured event hook for observability.
pub use crate::telemetry::{StorageEvent, StorageEventListener};
/// Contract data types.
pub use crate::types::{DataPoint, Item, Order, StatBucket, TagSet, Tenant, Timestamp, Value};

use std::time::Duration;
/// The default granularity of stored samples (30 seconds).
pub const DEFAULT_GRANULARITY: Duration = Duration::from_secs(30);
/// The default retention of stored samples (one day).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
