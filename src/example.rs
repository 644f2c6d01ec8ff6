//! Synthetic backend serving random gauge data, for demos and client development.

use crate::backend::Storage;
use crate::error::StorageError;
use crate::query::TagFilter;
use crate::types::{DataPoint, Item, Order, StatBucket, TagSet, Tenant, Timestamp, GAUGE};
use crate::utils::parse_options;
use rand::Rng;
use std::ops::Range;

const HELP: &str = "\
Example backend options:
  (none) every request is answered with random data; writes are accepted and discarded";

const TENANT: &str = "Example tenant";
const ITEM_COUNT: usize = 42;
const SAMPLE_SPACING_MS: i64 = 5_000;

/// Backend that invents its data. Writes, tag updates and deletes succeed without effect.
#[derive(Debug, Default)]
pub struct ExampleStorage;

impl ExampleStorage {
    /// The example backend takes no options, but the string must still be well formed.
    pub fn open(options: &str) -> Result<Self, StorageError> {
        parse_options(options)?;
        Ok(ExampleStorage)
    }

    fn random_value() -> f64 {
        124.0 + rand::rng().random_range(0..42) as f64
    }
}

impl Storage for ExampleStorage {
    fn name(&self) -> &'static str {
        "Example"
    }

    fn help(&self) -> &'static str {
        HELP
    }

    fn get_tenants(&self) -> Result<Vec<Tenant>, StorageError> {
        Ok(vec![Tenant {
            id: TENANT.to_string(),
        }])
    }

    fn get_item_list(&self, _tenant: &str, tags: &TagSet) -> Result<Vec<Item>, StorageError> {
        let filter = TagFilter::new(tags);
        let item_tags: TagSet = [("name", "example/gouge"), ("units", "byte")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Ok((0..ITEM_COUNT)
            .map(|i| Item {
                id: format!("container/{:08}/example/gouge", i),
                kind: GAUGE.to_string(),
                tags: item_tags.clone(),
                last_values: Vec::new(),
            })
            .filter(|item| filter.matches(&item.tags))
            .collect())
    }

    fn get_raw_data(
        &self,
        _tenant: &str,
        _id: &str,
        time_range: Range<Timestamp>,
        limit: usize,
        order: Order,
    ) -> Result<Vec<DataPoint>, StorageError> {
        let available = (time_range.end.saturating_sub(time_range.start).max(0) / SAMPLE_SPACING_MS) as usize;

        // Generated newest first, stepping back from the end of the range.
        let mut points: Vec<DataPoint> = (0..available.min(limit))
            .map(|i| {
                DataPoint::new(
                    time_range.end - SAMPLE_SPACING_MS * (i as i64 + 1),
                    Self::random_value(),
                )
            })
            .collect();

        if order == Order::Asc {
            points.reverse();
        }
        Ok(points)
    }

    fn get_stat_data(
        &self,
        _tenant: &str,
        _id: &str,
        time_range: Range<Timestamp>,
        limit: usize,
        order: Order,
        bucket_secs: u64,
    ) -> Result<Vec<StatBucket>, StorageError> {
        let bucket_ms = (bucket_secs.max(1) as i64).saturating_mul(1000);
        let available = (time_range.end.saturating_sub(time_range.start).max(0) / bucket_ms) as usize;

        let mut buckets: Vec<StatBucket> = (0..available.min(limit))
            .map(|i| {
                let end = time_range.end - bucket_ms * i as i64;
                let avg = Self::random_value();
                StatBucket {
                    start: end - bucket_ms,
                    end,
                    empty: false,
                    samples: 1,
                    min: avg,
                    max: avg,
                    first: avg,
                    last: avg,
                    avg,
                    sum: avg,
                }
            })
            .collect();

        if order == Order::Asc {
            buckets.reverse();
        }
        Ok(buckets)
    }

    fn post_raw_data(&self, _tenant: &str, _id: &str, _point: DataPoint) -> Result<(), StorageError> {
        Ok(())
    }

    fn put_tags(&self, _tenant: &str, _id: &str, _tags: &TagSet) -> Result<(), StorageError> {
        Ok(())
    }

    fn delete_data(
        &self,
        _tenant: &str,
        _id: &str,
        _time_range: Range<Timestamp>,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    fn delete_tags(&self, _tenant: &str, _id: &str, _keys: &[String]) -> Result<(), StorageError> {
        Ok(())
    }
}
