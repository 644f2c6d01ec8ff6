//! Core engine logic: the in-memory ring-buffer backend, its configuration, and the background
//! retention sweeper thread.

use crate::backend::Storage;
use crate::error::StorageError;
use crate::index::SlotIndex;
use crate::query::{execute_raw_query, execute_stat_query, TagFilter};
use crate::series::{Series, WriteOutcome};
use crate::storage::TenantRegistry;
use crate::telemetry::{noop_event_listener, storage_metrics, StorageEvent, StorageEventListener};
use crate::types::{DataPoint, Item, Order, StatBucket, TagSet, Tenant, Timestamp};
use crate::utils::{parse_duration, parse_options};

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{mpsc, Arc, RwLockReadGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const HELP: &str = "\
Memory backend options:
  granularity=<duration>     time resolution of stored samples, whole seconds (default 30s)
  retention=<duration>       age of the oldest readable sample, a multiple of granularity (default 24h)
  sweep_interval=<duration>  how often series without recent data are removed (default 120mn)

Durations are an integer followed by one of ms, s, mn, h, d.
e.g. granularity=30s&retention=1d";

/// Commands sent to the background sweeper thread.
enum SweepCommand {
    /// Run one sweep cycle now. `at` overrides the wall clock (milliseconds since epoch).
    Sweep {
        at: Option<Timestamp>,
        ack: mpsc::Sender<Result<usize, StorageError>>,
    },
    Shutdown,
}

/// Configuration options for [`MemoryStorage`].
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Time resolution of the ring buffer. Must be a whole number of seconds.
    pub granularity: Duration,
    /// Span covered by one ring. Must be a non-zero multiple of `granularity`.
    pub retention: Duration,
    /// Interval between automatic retention sweeps.
    pub sweep_interval: Duration,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn StorageEventListener>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            granularity: crate::DEFAULT_GRANULARITY,
            retention: crate::DEFAULT_RETENTION,
            sweep_interval: Duration::from_secs(120 * 60),
            event_listener: noop_event_listener(),
        }
    }
}

impl StorageConfig {
    /// Builds a configuration from a `granularity=30s&retention=1d&sweep_interval=10mn` string.
    /// Keys that are not supplied keep their defaults.
    ///
    /// # Errors
    /// Returns `InvalidDuration` for unparsable values and `ConfigError` for unknown keys.
    pub fn from_options(options: &str) -> Result<Self, StorageError> {
        let mut config = StorageConfig::default();
        for (key, value) in parse_options(options)? {
            match key.as_str() {
                "granularity" => config.granularity = parse_duration(&value)?,
                "retention" => config.retention = parse_duration(&value)?,
                "sweep_interval" => config.sweep_interval = parse_duration(&value)?,
                other => {
                    return Err(StorageError::ConfigError(format!(
                        "unknown memory backend option {:?}",
                        other
                    )))
                }
            }
        }
        Ok(config)
    }
}

/// In-memory, tenant-scoped ring-buffer metrics engine.
///
/// Every series keeps `retention / granularity` slots. Writes, reads and the sweeper share one
/// [`TenantRegistry`]; the sweeper runs on its own thread until the engine is dropped.
#[derive(Debug)]
pub struct MemoryStorage {
    /// Tenant -> series map shared with the sweeper thread.
    registry: Arc<TenantRegistry>,
    /// Slot arithmetic derived once from the configuration.
    index: SlotIndex,
    /// Newest timestamp ingested by any series; meaningful once `ingested` is set.
    newest: AtomicI64,
    ingested: AtomicBool,
    /// Channel sender for sweeper commands.
    sweep_cmd_tx: mpsc::Sender<SweepCommand>,
    /// Handle for the background sweeper thread.
    sweep_handle: Option<JoinHandle<()>>,
    config: StorageConfig,
}

impl MemoryStorage {
    /// Creates an engine with the provided configuration and starts its sweeper thread.
    ///
    /// # Errors
    /// Returns `ConfigError` if granularity, retention or the sweep interval are invalid, and
    /// `BackgroundTaskError` if the sweeper thread cannot be spawned.
    pub fn with_config(config: StorageConfig) -> Result<Self, StorageError> {
        let index = SlotIndex::new(config.granularity, config.retention)?;
        if config.sweep_interval.is_zero() {
            return Err(StorageError::ConfigError(
                "sweep_interval must be greater than zero".to_string(),
            ));
        }

        let registry = Arc::new(TenantRegistry::new(index.capacity()));
        let (sweep_cmd_tx, sweep_cmd_rx) = mpsc::channel::<SweepCommand>();

        let registry_clone = Arc::clone(&registry);
        let events = Arc::clone(&config.event_listener);
        let sweep_interval = config.sweep_interval;
        let retention_ms = index.retention_ms();

        let sweep_handle = thread::Builder::new()
            .name("tsring-sweeper".to_string())
            .spawn(move || {
                events.on_event(StorageEvent::SweepThreadStarted);

                let sweep = |now_ms: Timestamp| -> Result<usize, StorageError> {
                    let res = sweep_registry(
                        &registry_clone,
                        now_ms.saturating_sub(retention_ms),
                        events.as_ref(),
                    );
                    if let Err(e) = &res {
                        events.on_event(StorageEvent::SweepFailed { error: e.to_string() });
                    }
                    res
                };

                // Manual sweeps do not move the periodic schedule. `None` means the interval is
                // too long to ever elapse.
                let mut next_sweep = Instant::now().checked_add(sweep_interval);
                loop {
                    let received = match next_sweep {
                        Some(deadline) => sweep_cmd_rx
                            .recv_timeout(deadline.saturating_duration_since(Instant::now())),
                        None => sweep_cmd_rx
                            .recv()
                            .map_err(|_| mpsc::RecvTimeoutError::Disconnected),
                    };
                    match received {
                        Ok(SweepCommand::Sweep { at, ack }) => {
                            let _ = ack.send(sweep(at.unwrap_or_else(now_millis)));
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            let _ = sweep(now_millis());
                            // A sweep that overran its interval starts the next one a full
                            // interval later.
                            let now = Instant::now();
                            next_sweep = next_sweep
                                .and_then(|d| d.checked_add(sweep_interval))
                                .filter(|d| *d > now)
                                .or_else(|| now.checked_add(sweep_interval));
                        }
                        // Shutdown requested, or the engine was dropped without one.
                        Ok(SweepCommand::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            events.on_event(StorageEvent::SweepThreadStopping);
                            break;
                        }
                    }
                }
            })
            .map_err(|e| {
                StorageError::BackgroundTaskError(format!("Failed to spawn sweeper thread: {}", e))
            })?;

        Ok(MemoryStorage {
            registry,
            index,
            newest: AtomicI64::new(Timestamp::MIN),
            ingested: AtomicBool::new(false),
            sweep_cmd_tx,
            sweep_handle: Some(sweep_handle),
            config,
        })
    }

    /// Opens an engine from a backend option string (see [`StorageConfig::from_options`]).
    pub fn open(options: &str) -> Result<Self, StorageError> {
        Self::with_config(StorageConfig::from_options(options)?)
    }

    /// Runs one retention sweep against the wall clock and waits for it.
    /// Returns the number of series removed.
    pub fn sweep_now(&self) -> Result<usize, StorageError> {
        self.request_sweep(None)
    }

    /// Runs one retention sweep as if the current time were `now_ms`.
    pub fn sweep_expired_at(&self, now_ms: Timestamp) -> Result<usize, StorageError> {
        self.request_sweep(Some(now_ms))
    }

    fn request_sweep(&self, at: Option<Timestamp>) -> Result<usize, StorageError> {
        let (tx, rx) = mpsc::channel();
        self.sweep_cmd_tx
            .send(SweepCommand::Sweep { at, ack: tx })
            .map_err(|e| StorageError::BackgroundTaskError(format!("Failed to send sweep command: {}", e)))?;
        rx.recv()
            .map_err(|e| StorageError::BackgroundTaskError(format!("Failed to receive sweep ack: {}", e)))?
    }

    /// Number of slots in every series.
    pub fn capacity(&self) -> usize {
        self.index.capacity()
    }

    /// Number of series currently held across all tenants.
    pub fn series_count(&self) -> Result<usize, StorageError> {
        self.registry.series_count()
    }

    /// Newest timestamp ever ingested, if any.
    pub fn newest_timestamp(&self) -> Option<Timestamp> {
        if !self.ingested.load(Ordering::Acquire) {
            return None;
        }
        Some(self.newest.load(Ordering::Acquire))
    }

    pub fn get_config(&self) -> &StorageConfig {
        &self.config
    }

    /// Restricts `time_range` to `[newest - retention, newest + 1)`. `None` when nothing
    /// readable remains.
    fn clamp_to_retention(&self, time_range: Range<Timestamp>) -> Option<Range<Timestamp>> {
        let newest = self.newest_timestamp()?;
        let start = time_range
            .start
            .max(newest.saturating_sub(self.index.retention_ms()));
        let end = time_range.end.min(newest.saturating_add(1));
        (start < end).then_some(start..end)
    }

    /// Resolves a live series and applies `f` to it under its write lock. A series retired by
    /// the sweeper between lookup and locking is looked up again.
    fn with_live_series<T>(
        &self,
        tenant: &str,
        id: &str,
        mut f: impl FnMut(&mut Series) -> T,
    ) -> Result<T, StorageError> {
        loop {
            let (series, created) = self.registry.get_or_create(tenant, id)?;
            if created {
                storage_metrics::record_series_created();
            }
            let mut guard = series.write()?;
            if guard.is_retired() {
                continue;
            }
            return Ok(f(&mut guard));
        }
    }

    /// Read-lock counterpart of [`Self::with_live_series`].
    fn with_live_series_read<T>(
        &self,
        tenant: &str,
        id: &str,
        f: impl FnOnce(RwLockReadGuard<'_, Series>) -> T,
    ) -> Result<T, StorageError> {
        loop {
            let (series, created) = self.registry.get_or_create(tenant, id)?;
            if created {
                storage_metrics::record_series_created();
            }
            let guard = series.read()?;
            if guard.is_retired() {
                continue;
            }
            return Ok(f(guard));
        }
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &'static str {
        "Memory"
    }

    fn help(&self) -> &'static str {
        HELP
    }

    fn get_tenants(&self) -> Result<Vec<Tenant>, StorageError> {
        Ok(self
            .registry
            .tenant_ids()?
            .into_iter()
            .map(|id| Tenant { id })
            .collect())
    }

    fn get_item_list(&self, tenant: &str, tags: &TagSet) -> Result<Vec<Item>, StorageError> {
        self.registry.list_items(tenant, &TagFilter::new(tags))
    }

    fn get_raw_data(
        &self,
        tenant: &str,
        id: &str,
        time_range: Range<Timestamp>,
        limit: usize,
        order: Order,
    ) -> Result<Vec<DataPoint>, StorageError> {
        let started = Instant::now();
        let clamped = self.clamp_to_retention(time_range);
        let index = &self.index;
        let points = self.with_live_series_read(tenant, id, |series| match clamped {
            Some(range) => execute_raw_query(series, index, range, limit, order),
            None => Vec::new(),
        })?;

        storage_metrics::record_query("raw", started.elapsed());
        Ok(points)
    }

    fn get_stat_data(
        &self,
        tenant: &str,
        id: &str,
        time_range: Range<Timestamp>,
        limit: usize,
        order: Order,
        bucket_secs: u64,
    ) -> Result<Vec<StatBucket>, StorageError> {
        let started = Instant::now();
        let clamped = self.clamp_to_retention(time_range);
        let index = &self.index;
        let buckets = self.with_live_series_read(tenant, id, |series| match clamped {
            Some(range) => execute_stat_query(series, index, range, limit, order, bucket_secs),
            None => Vec::new(),
        })?;

        storage_metrics::record_query("stat", started.elapsed());
        Ok(buckets)
    }

    fn post_raw_data(&self, tenant: &str, id: &str, point: DataPoint) -> Result<(), StorageError> {
        let index = self.index;
        let outcome = self.with_live_series(tenant, id, |series| series.write(&index, point))?;
        self.newest.fetch_max(point.timestamp, Ordering::AcqRel);
        self.ingested.store(true, Ordering::Release);
        storage_metrics::record_ingest(outcome == WriteOutcome::Downsampled);
        Ok(())
    }

    fn put_tags(&self, tenant: &str, id: &str, tags: &TagSet) -> Result<(), StorageError> {
        self.with_live_series(tenant, id, |series| series.merge_tags(tags))
    }

    // Deletion is accepted but not supported by the ring buffer.
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

/// Implement Drop to stop the sweeper thread deterministically.
impl Drop for MemoryStorage {
    fn drop(&mut self) {
        // Ignore send errors: the thread may already have exited.
        let _ = self.sweep_cmd_tx.send(SweepCommand::Shutdown);

        if let Some(handle) = self.sweep_handle.take() {
            if handle.join().is_err() {
                self.config
                    .event_listener
                    .on_event(StorageEvent::SweepThreadPanicked);
            }
        }
    }
}

/// One sweep cycle: removes every series whose newest point is older than `cutoff`.
fn sweep_registry(
    registry: &TenantRegistry,
    cutoff: Timestamp,
    events: &dyn StorageEventListener,
) -> Result<usize, StorageError> {
    let started = Instant::now();

    let mut removed = 0;
    for (tenant, id) in registry.expired_candidates(cutoff)? {
        // Each removal re-checks expiry; a series written to since selection survives.
        if registry.remove_if_expired(&tenant, &id, cutoff)? {
            removed += 1;
            events.on_event(StorageEvent::SeriesExpired { tenant, id });
        }
    }

    let remaining = registry.series_count()?;
    let duration = started.elapsed();
    storage_metrics::record_sweep(duration, removed as u64, remaining as u64);
    events.on_event(StorageEvent::SweepCompleted {
        removed,
        remaining,
        duration,
    });
    Ok(removed)
}

fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}
