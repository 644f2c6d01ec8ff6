use std::sync::Arc;

#[cfg(feature = "prometheus")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "prometheus")]
use std::sync::Mutex;
#[cfg(feature = "prometheus")]
use std::thread::JoinHandle;
use std::time::Duration;

/// Structured, in-process event hook for observability.
///
/// The library never prints; callers forward these events to `tracing` or their own sinks.
pub trait StorageEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: StorageEvent);
}

/// Structured events emitted by the storage engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    SweepThreadStarted,
    SweepThreadStopping,
    SweepThreadPanicked,

    SeriesExpired { tenant: String, id: String },
    SweepCompleted { removed: usize, remaining: usize, duration: Duration },
    SweepFailed { error: String },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl StorageEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: StorageEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn StorageEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation and in-process scraping.
///
/// ## Key properties
/// - Library-safe: emitting metrics is effectively a no-op until a recorder is installed.
/// - Serverless scraping: callers can render Prometheus exposition text in-process.
/// - Low operational overhead: a lightweight upkeep thread is spawned to keep histograms bounded.
pub mod storage_metrics {
    use super::*;

    #[cfg(feature = "prometheus")]
    use ::metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

    // --- metric names ---
    //
    // Notes:
    // - Counters are exposed as `<name>_total` by the Prometheus exporter.
    // - Histograms are exposed as `<name>_bucket`, `<name>_sum`, `<name>_count`.

    pub const INGEST_POINTS: &str = "tsring_ingest_points";
    pub const INGEST_DOWNSAMPLED_POINTS: &str = "tsring_ingest_downsampled_points";
    pub const SERIES_CREATED: &str = "tsring_series_created";
    pub const SERIES_EXPIRED: &str = "tsring_series_expired";
    pub const SERIES_ACTIVE: &str = "tsring_series_active";
    pub const SWEEP_DURATION_SECONDS: &str = "tsring_sweep_duration_seconds";
    pub const QUERY_DURATION_SECONDS: &str = "tsring_query_duration_seconds";

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
        stop: Arc<AtomicBool>,
        upkeep_thread: Mutex<Option<JoinHandle<()>>>,
    }

    // `PrometheusHandle` has no `Debug` impl.
    #[cfg(feature = "prometheus")]
    impl std::fmt::Debug for InProcessPrometheus {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("InProcessPrometheus")
                .field("stop", &self.stop)
                .field("upkeep_thread", &self.upkeep_thread)
                .finish_non_exhaustive()
        }
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process) and starts a small upkeep thread.
        ///
        /// The upkeep thread periodically calls `run_upkeep()` to keep exporter internals healthy
        /// (e.g. histogram maintenance). This is required when using `install_recorder`.
        pub fn install(upkeep_interval: Duration) -> Result<Self, MetricsInitError> {
            describe_all();

            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = Arc::clone(&stop);
            let handle_clone = handle.clone();
            let upkeep_thread = std::thread::Builder::new()
                .name("tsring-metrics-upkeep".to_string())
                .spawn(move || {
                    while !stop_clone.load(Ordering::Relaxed) {
                        std::thread::sleep(upkeep_interval);
                        handle_clone.run_upkeep();
                    }
                })
                .map_err(|e| MetricsInitError::ThreadSpawn(e.to_string()))?;

            Ok(Self {
                handle,
                stop,
                upkeep_thread: Mutex::new(Some(upkeep_thread)),
            })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    impl Drop for InProcessPrometheus {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Ok(mut guard) = self.upkeep_thread.lock() {
                if let Some(t) = guard.take() {
                    let _ = t.join();
                }
            }
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
        #[error("failed to spawn upkeep thread: {0}")]
        ThreadSpawn(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    #[inline]
    pub fn record_ingest(downsampled: bool) {
        ::metrics::counter!(INGEST_POINTS).increment(1);
        if downsampled {
            ::metrics::counter!(INGEST_DOWNSAMPLED_POINTS).increment(1);
        }
    }

    #[inline]
    pub fn record_series_created() {
        ::metrics::counter!(SERIES_CREATED).increment(1);
    }

    #[inline]
    pub fn record_sweep(duration: Duration, removed: u64, remaining: u64) {
        ::metrics::histogram!(SWEEP_DURATION_SECONDS).record(duration.as_secs_f64());
        if removed > 0 {
            ::metrics::counter!(SERIES_EXPIRED).increment(removed);
        }
        ::metrics::gauge!(SERIES_ACTIVE).set(remaining as f64);
    }

    /// `kind` is `"raw"` or `"stat"`.
    #[inline]
    pub fn record_query(kind: &'static str, duration: Duration) {
        ::metrics::histogram!(QUERY_DURATION_SECONDS, "kind" => kind).record(duration.as_secs_f64());
    }

    #[cfg(feature = "prometheus")]
    fn describe_all() {
        // Counters
        describe_counter!(
            INGEST_POINTS,
            Unit::Count,
            "Total number of points accepted by MemoryStorage::post_raw_data."
        );
        describe_counter!(
            INGEST_DOWNSAMPLED_POINTS,
            Unit::Count,
            "Points that only updated the last value because their slot already held a sample of the same or a newer window."
        );
        describe_counter!(
            SERIES_CREATED,
            Unit::Count,
            "Series auto-provisioned on first write, tag update or read."
        );
        describe_counter!(
            SERIES_EXPIRED,
            Unit::Count,
            "Series removed by the retention sweeper."
        );

        // Histograms
        describe_histogram!(
            SWEEP_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of one retention sweep over all tenants."
        );
        describe_histogram!(
            QUERY_DURATION_SECONDS,
            Unit::Seconds,
            "Raw and statistics query execution time, labelled by kind."
        );

        // Gauges
        describe_gauge!(
            SERIES_ACTIVE,
            Unit::Count,
            "Series held in memory after the most recent sweep."
        );
    }
}
