//! Storage contract shared by every backend, plus the backend factory.

use crate::core::MemoryStorage;
use crate::error::StorageError;
use crate::example::ExampleStorage;
use crate::types::{DataPoint, Item, Order, StatBucket, TagSet, Tenant, Timestamp};
use std::fmt::Debug;
use std::ops::Range;

/// Operations the API layer and the alert evaluator perform against a metrics backend.
///
/// Time ranges are half-open `[start, end)` in milliseconds. Unknown tenants or series are
/// never an error: writes create them, reads return empty results.
pub trait Storage: Send + Sync + Debug {
    /// Short human-readable backend name.
    fn name(&self) -> &'static str;

    /// Option-string help for this backend.
    fn help(&self) -> &'static str;

    /// All known tenants, ordered by id.
    fn get_tenants(&self) -> Result<Vec<Tenant>, StorageError>;

    /// Series of `tenant` whose tags match every entry of `tags` (anchored regex, AND).
    fn get_item_list(&self, tenant: &str, tags: &TagSet) -> Result<Vec<Item>, StorageError>;

    /// Stored samples in `time_range`, at most `limit`, earliest points preferred.
    fn get_raw_data(
        &self,
        tenant: &str,
        id: &str,
        time_range: Range<Timestamp>,
        limit: usize,
        order: Order,
    ) -> Result<Vec<DataPoint>, StorageError>;

    /// Statistics over `time_range` in buckets of `bucket_secs` seconds, at most `limit` buckets.
    fn get_stat_data(
        &self,
        tenant: &str,
        id: &str,
        time_range: Range<Timestamp>,
        limit: usize,
        order: Order,
        bucket_secs: u64,
    ) -> Result<Vec<StatBucket>, StorageError>;

    /// Ingests one point.
    fn post_raw_data(&self, tenant: &str, id: &str, point: DataPoint) -> Result<(), StorageError>;

    /// Merges `tags` into the series' tag set.
    fn put_tags(&self, tenant: &str, id: &str, tags: &TagSet) -> Result<(), StorageError>;

    fn delete_data(
        &self,
        tenant: &str,
        id: &str,
        time_range: Range<Timestamp>,
    ) -> Result<(), StorageError>;

    fn delete_tags(&self, tenant: &str, id: &str, keys: &[String]) -> Result<(), StorageError>;
}

/// Names accepted by [`open_backend`].
pub const BACKENDS: &[&str] = &["memory", "example"];

/// Opens the backend called `name` with its option string.
///
/// # Errors
/// `UnknownBackend` for an unrecognised name; configuration errors from the backend itself.
pub fn open_backend(name: &str, options: &str) -> Result<Box<dyn Storage>, StorageError> {
    match name {
        "memory" => Ok(Box::new(MemoryStorage::open(options)?)),
        "example" => Ok(Box::new(ExampleStorage::open(options)?)),
        other => Err(StorageError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_backend_by_name() {
        let memory = open_backend("memory", "granularity=30s&retention=1h").unwrap();
        assert_eq!(memory.name(), "Memory");

        let example = open_backend("example", "").unwrap();
        assert_eq!(example.name(), "Example");
    }

    #[test]
    fn open_backend_rejects_unknown_and_bad_options() {
        assert!(matches!(
            open_backend("cassandra", ""),
            Err(StorageError::UnknownBackend(name)) if name == "cassandra"
        ));
        assert!(open_backend("memory", "granularity=7x").is_err());
        assert!(open_backend("memory", "granularity=30s&retention=45s").is_err());
    }
}
