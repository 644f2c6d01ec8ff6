//! Time bucket index: maps millisecond timestamps onto ring-buffer slots.
//!
//! Time is cut into fixed *windows* of one granularity each. Window `w` lives in slot
//! `w mod capacity`, so `slot(t) = floor(t / 1000 / granularity_sec) mod capacity`.
//! Scans walk windows rather than raw slot numbers; mapping each window back to its slot
//! gives the wrap-around traversal of the ring for free.

use crate::error::StorageError;
use crate::types::Timestamp;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Pure slot arithmetic for one engine instance. No state beyond the two constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotIndex {
    granularity_ms: i64,
    capacity: usize,
}

impl SlotIndex {
    /// Validates granularity/retention and derives the ring capacity.
    ///
    /// # Errors
    /// Returns `ConfigError` if granularity is not a whole, non-zero number of seconds, or if
    /// retention is not a non-zero integer multiple of granularity.
    pub fn new(granularity: Duration, retention: Duration) -> Result<Self, StorageError> {
        if granularity.as_secs() == 0 || granularity.subsec_nanos() != 0 {
            return Err(StorageError::ConfigError(format!(
                "granularity must be a whole number of seconds >= 1s, got {:?}",
                granularity
            )));
        }
        if retention.is_zero() || retention.as_nanos() % granularity.as_nanos() != 0 {
            return Err(StorageError::ConfigError(format!(
                "retention ({:?}) must be a non-zero multiple of granularity ({:?})",
                retention, granularity
            )));
        }

        let granularity_ms = i64::try_from(granularity.as_millis())
            .map_err(|_| StorageError::ConfigError("granularity too large".to_string()))?;
        let capacity = usize::try_from(retention.as_nanos() / granularity.as_nanos())
            .map_err(|_| StorageError::ConfigError("retention too large".to_string()))?;
        i64::try_from(capacity)
            .ok()
            .and_then(|c| c.checked_mul(granularity_ms))
            .ok_or_else(|| StorageError::ConfigError("retention too large".to_string()))?;

        Ok(Self {
            granularity_ms,
            capacity,
        })
    }

    /// Number of slots in every series' ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn granularity_ms(&self) -> i64 {
        self.granularity_ms
    }

    /// Time span covered by one full ring.
    #[inline]
    pub fn retention_ms(&self) -> i64 {
        self.granularity_ms * self.capacity as i64
    }

    /// The granularity window a timestamp belongs to.
    #[inline]
    pub fn window(&self, t: Timestamp) -> i64 {
        t.div_euclid(self.granularity_ms)
    }

    #[inline]
    pub fn slot_of_window(&self, window: i64) -> usize {
        window.rem_euclid(self.capacity as i64) as usize
    }

    #[inline]
    pub fn slot(&self, t: Timestamp) -> usize {
        self.slot_of_window(self.window(t))
    }

    /// Windows that can hold samples in `[start, end)`, oldest first. `None` for an empty range.
    pub fn scan_windows(&self, start: Timestamp, end: Timestamp) -> Option<RangeInclusive<i64>> {
        if start >= end {
            return None;
        }
        Some(self.window(start)..=self.window(end - 1))
    }

    /// Lays out statistics buckets over `[start, end)`.
    ///
    /// The requested width is rounded down to whole granularity units (at least one, at most a
    /// full ring); `start` is floored and `end` ceiled to bucket boundaries. Boundaries that
    /// fall outside the timestamp range are clamped to it, truncating the outermost buckets.
    pub fn plan_buckets(
        &self,
        start: Timestamp,
        end: Timestamp,
        bucket_secs: u64,
    ) -> Option<BucketPlan> {
        if start >= end {
            return None;
        }

        let granularity_secs = (self.granularity_ms / 1000) as u64;
        let windows_per_bucket = (bucket_secs / granularity_secs).clamp(1, self.capacity as u64) as i64;
        let bucket_ms = windows_per_bucket * self.granularity_ms;

        // Aligned in i128 so that ranges touching the ends of the timestamp range cannot overflow.
        let width = i128::from(bucket_ms);
        let origin = i128::from(start).div_euclid(width) * width;
        let aligned_end = (i128::from(end) + width - 1).div_euclid(width) * width;
        let count = usize::try_from((aligned_end - origin) / width).unwrap_or(usize::MAX);

        Some(BucketPlan {
            start: clamp_timestamp(origin),
            end: clamp_timestamp(aligned_end),
            bucket_ms,
            windows_per_bucket,
            origin,
            count,
        })
    }
}

fn clamp_timestamp(t: i128) -> Timestamp {
    t.clamp(i128::from(Timestamp::MIN), i128::from(Timestamp::MAX)) as Timestamp
}

/// Bucket layout produced by [`SlotIndex::plan_buckets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPlan {
    /// First bucket start (bucket aligned unless clamped).
    pub start: Timestamp,
    /// Last bucket end (bucket aligned unless clamped, exclusive).
    pub end: Timestamp,
    pub bucket_ms: i64,
    /// Consecutive slots aggregated into one bucket.
    pub windows_per_bucket: i64,
    origin: i128,
    count: usize,
}

impl BucketPlan {
    pub fn bucket_count(&self) -> usize {
        self.count
    }

    /// `[start, end)` of the `i`-th bucket.
    pub fn bucket_bounds(&self, i: usize) -> (Timestamp, Timestamp) {
        let width = i128::from(self.bucket_ms);
        let start = self.origin + i as i128 * width;
        (clamp_timestamp(start), clamp_timestamp(start + width))
    }
}
