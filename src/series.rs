use crate::index::SlotIndex;
use crate::types::{DataPoint, TagSet, Timestamp};

/// What a write did to the ring buffer. The last-value tracker is updated either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The slot was empty or held a sample from an older window; the point was stored.
    Stored,
    /// The slot already held a sample from the same or a newer window; the point was dropped.
    Downsampled,
}

/// One metric's fixed-capacity ring buffer, its tags and its most recent point.
///
/// The ring never grows: slot `i` holds at most one sample, the first one observed for the
/// newest granularity window that maps to `i`.
#[derive(Debug, Clone)]
pub struct Series {
    tags: TagSet,
    slots: Box<[Option<DataPoint>]>,
    last_value: Option<DataPoint>,
    retired: bool,
}

impl Series {
    pub fn new(capacity: usize) -> Self {
        Self {
            tags: TagSet::new(),
            slots: vec![None; capacity].into_boxed_slice(),
            last_value: None,
            retired: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Merges `tags` into the existing tag set; existing keys are overwritten.
    pub fn merge_tags(&mut self, tags: &TagSet) {
        for (k, v) in tags {
            self.tags.insert(k.clone(), v.clone());
        }
    }

    /// Newest point ever accepted, regardless of whether it still occupies a slot.
    pub fn last_value(&self) -> Option<DataPoint> {
        self.last_value
    }

    /// Applies the downsample-on-write policy for `point` and advances the last value.
    pub fn write(&mut self, index: &SlotIndex, point: DataPoint) -> WriteOutcome {
        let slot = &mut self.slots[index.slot(point.timestamp)];
        let incoming_window = index.window(point.timestamp);

        let occupied_by_same_or_newer = matches!(
            *slot,
            Some(existing) if index.window(existing.timestamp) >= incoming_window
        );
        let outcome = if occupied_by_same_or_newer {
            WriteOutcome::Downsampled
        } else {
            *slot = Some(point);
            WriteOutcome::Stored
        };

        if self.last_value.map_or(true, |last| point.timestamp > last.timestamp) {
            self.last_value = Some(point);
        }

        outcome
    }

    /// The sample stored for `window`, if its slot is currently occupied by that window.
    ///
    /// Slots shared with other windows (aliasing) are reported as empty for this window.
    #[inline]
    pub fn sample_in_window(&self, index: &SlotIndex, window: i64) -> Option<DataPoint> {
        self.slots[index.slot_of_window(window)]
            .filter(|p| index.window(p.timestamp) == window)
    }

    /// True when the newest point is older than `cutoff`. Series that never received a point
    /// are always expired.
    pub fn is_expired(&self, cutoff: Timestamp) -> bool {
        self.last_value.map_or(true, |last| last.timestamp < cutoff)
    }

    /// Marks the series as removed from its registry. Writers holding a stale handle must
    /// re-resolve the series instead of writing into a retired one.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn index(granularity_secs: u64, retention_secs: u64) -> SlotIndex {
        SlotIndex::new(
            Duration::from_secs(granularity_secs),
            Duration::from_secs(retention_secs),
        )
        .unwrap()
    }

    fn create_tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn new_series_is_empty() {
        let idx = index(30, 120);
        let series = Series::new(idx.capacity());
        assert_eq!(series.capacity(), 4);
        assert!(series.last_value().is_none());
        assert!(series.tags().is_empty());
        assert!((0..4).all(|w| series.sample_in_window(&idx, w).is_none()));
    }

    #[test]
    fn first_write_in_window_wins() {
        let idx = index(30, 120);
        let mut series = Series::new(idx.capacity());

        assert_eq!(series.write(&idx, DataPoint::new(1_000, 1.0)), WriteOutcome::Stored);
        assert_eq!(
            series.write(&idx, DataPoint::new(20_000, 2.0)),
            WriteOutcome::Downsampled
        );

        assert_eq!(series.sample_in_window(&idx, 0), Some(DataPoint::new(1_000, 1.0)));
        // The last value still tracks the newest ingest.
        assert_eq!(series.last_value(), Some(DataPoint::new(20_000, 2.0)));
    }

    #[test]
    fn newer_window_evicts_aliased_slot() {
        let idx = index(30, 60);
        let mut series = Series::new(idx.capacity());

        series.write(&idx, DataPoint::new(0, 10.0));
        series.write(&idx, DataPoint::new(30_000, 20.0));
        assert_eq!(series.write(&idx, DataPoint::new(60_000, 30.0)), WriteOutcome::Stored);

        assert!(series.sample_in_window(&idx, 0).is_none());
        assert_eq!(series.sample_in_window(&idx, 1), Some(DataPoint::new(30_000, 20.0)));
        assert_eq!(series.sample_in_window(&idx, 2), Some(DataPoint::new(60_000, 30.0)));
    }

    #[test]
    fn late_point_does_not_overwrite_newer_window_or_regress_last_value() {
        let idx = index(30, 60);
        let mut series = Series::new(idx.capacity());

        series.write(&idx, DataPoint::new(60_000, 30.0));
        // Window 0 aliases onto the slot that now holds window 2.
        assert_eq!(
            series.write(&idx, DataPoint::new(0, 10.0)),
            WriteOutcome::Downsampled
        );
        assert_eq!(series.sample_in_window(&idx, 2), Some(DataPoint::new(60_000, 30.0)));
        assert_eq!(series.last_value(), Some(DataPoint::new(60_000, 30.0)));
    }

    #[test]
    fn out_of_order_point_fills_empty_slot() {
        let idx = index(30, 120);
        let mut series = Series::new(idx.capacity());

        series.write(&idx, DataPoint::new(90_000, 3.0));
        assert_eq!(series.write(&idx, DataPoint::new(30_000, 1.0)), WriteOutcome::Stored);
        assert_eq!(series.sample_in_window(&idx, 1), Some(DataPoint::new(30_000, 1.0)));
        assert_eq!(series.last_value(), Some(DataPoint::new(90_000, 3.0)));
    }

    #[test]
    fn merge_tags_overwrites_existing_keys() {
        let mut series = Series::new(2);
        series.merge_tags(&create_tags(&[("host", "a"), ("units", "byte")]));
        series.merge_tags(&create_tags(&[("host", "b")]));
        assert_eq!(series.tags(), &create_tags(&[("host", "b"), ("units", "byte")]));
    }

    #[test]
    fn expiry_uses_last_value() {
        let idx = index(30, 60);
        let mut series = Series::new(idx.capacity());
        assert!(series.is_expired(0));

        series.write(&idx, DataPoint::new(50_000, 1.0));
        assert!(!series.is_expired(50_000));
        assert!(series.is_expired(50_001));
    }
}
