use crate::index::SlotIndex;
use crate::series::Series;
use crate::types::{DataPoint, Order, StatBucket, TagSet, Timestamp, Value};
use rayon::prelude::*;
use regex::Regex;
use std::ops::Range;
use std::sync::RwLockReadGuard;

/// Executes a raw range query against a single series.
///
/// # Arguments
/// * `series_guard` - A read guard for the `Series` to query.
/// * `index` - Slot arithmetic of the owning engine.
/// * `time_range` - The time range (start inclusive, end exclusive) for the query.
/// * `limit` - Maximum number of points returned.
/// * `order` - Ordering of the returned points.
///
/// The ring is always scanned oldest window first, so when `limit` cuts the result short the
/// earliest points in range are the ones kept. `Order::Desc` only reverses the kept points.
pub fn execute_raw_query(
    // Takes a read guard to ensure data doesn't change during query execution
    series_guard: RwLockReadGuard<Series>,
    index: &SlotIndex,
    time_range: Range<Timestamp>,
    limit: usize,
    order: Order,
) -> Vec<DataPoint> {
    let series = &*series_guard;

    let windows = match index.scan_windows(time_range.start, time_range.end) {
        Some(w) => w,
        None => return Vec::new(),
    };

    let mut results = Vec::new();
    for window in windows {
        if results.len() >= limit {
            break;
        }
        if let Some(point) = series.sample_in_window(index, window) {
            if time_range.contains(&point.timestamp) {
                results.push(point);
            }
        }
    }

    if order == Order::Desc {
        results.reverse();
    }
    results
}

/// Executes a bucketed statistics query against a single series.
///
/// Bucket bounds are `time_range` widened to bucket boundaries (see
/// [`SlotIndex::plan_buckets`]), but only samples inside `time_range` are aggregated. Buckets with
/// no samples are emitted as explicit `empty` placeholders. At most `limit` buckets are
/// returned, earliest first before `order` is applied.
pub fn execute_stat_query(
    series_guard: RwLockReadGuard<Series>,
    index: &SlotIndex,
    time_range: Range<Timestamp>,
    limit: usize,
    order: Order,
    bucket_secs: u64,
) -> Vec<StatBucket> {
    let series = &*series_guard;

    let plan = match index.plan_buckets(time_range.start, time_range.end, bucket_secs) {
        Some(p) => p,
        None => return Vec::new(),
    };
    let count = plan.bucket_count().min(limit);

    // --- Parallel per-bucket aggregation; collect keeps bucket order --- //
    let mut buckets: Vec<StatBucket> = (0..count)
        .into_par_iter()
        .map(|i| {
            let (start, end) = plan.bucket_bounds(i);

            // Only the part of the bucket inside `time_range` contributes samples.
            let mut acc = BucketAccumulator::default();
            let in_range = start.max(time_range.start)..end.min(time_range.end);
            if let Some(windows) = index.scan_windows(in_range.start, in_range.end) {
                for window in windows {
                    if let Some(point) = series.sample_in_window(index, window) {
                        if in_range.contains(&point.timestamp) {
                            acc.push(point.value);
                        }
                    }
                }
            }
            acc.finish(start, end)
        })
        .collect();

    if order == Order::Desc {
        buckets.reverse();
    }
    buckets
}

/// Running statistics for one bucket, fed in chronological order.
#[derive(Debug, Default)]
struct BucketAccumulator {
    samples: u64,
    sum: Value,
    min: Value,
    max: Value,
    first: Value,
    last: Value,
}

impl BucketAccumulator {
    fn push(&mut self, value: Value) {
        if self.samples == 0 {
            self.first = value;
            self.min = value;
            self.max = value;
        } else {
            if value < self.min {
                self.min = value;
            }
            if value > self.max {
                self.max = value;
            }
        }
        self.last = value;
        self.sum += value;
        self.samples += 1;
    }

    fn finish(self, start: Timestamp, end: Timestamp) -> StatBucket {
        if self.samples == 0 {
            return StatBucket::empty(start, end);
        }
        StatBucket {
            start,
            end,
            empty: false,
            samples: self.samples,
            min: self.min,
            max: self.max,
            first: self.first,
            last: self.last,
            avg: self.sum / self.samples as f64,
            sum: self.sum,
        }
    }
}

/// A compiled tag query: every key must fully match its anchored regular expression.
#[derive(Debug)]
pub struct TagFilter {
    // `None` marks a pattern that failed to compile; it never matches.
    matchers: Vec<(String, Option<Regex>)>,
}

impl TagFilter {
    pub fn new(query: &TagSet) -> Self {
        let matchers = query
            .iter()
            .map(|(key, value)| (key.clone(), Regex::new(&format!("^(?:{})$", value)).ok()))
            .collect();
        Self { matchers }
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// An empty query matches everything; an untagged item never matches a non-empty query.
    /// A key missing from the item is matched as the empty string.
    pub fn matches(&self, item_tags: &TagSet) -> bool {
        if self.matchers.is_empty() {
            return true;
        }
        if item_tags.is_empty() {
            return false;
        }
        self.matchers.iter().all(|(key, re)| {
            let value = item_tags.get(key).map(String::as_str).unwrap_or("");
            re.as_ref().map_or(false, |re| re.is_match(value))
        })
    }
}

/// Checks an item's tags against a tag query (AND of anchored regex matches).
#[inline]
pub fn has_matching_tag(query: &TagSet, item_tags: &TagSet) -> bool {
    TagFilter::new(query).matches(item_tags)
}
