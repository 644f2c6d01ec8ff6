//! Daemon hosting a tsring storage backend.
//!
//! Loads configuration from (in precedence order): defaults, config file, environment variables
//! (`TSRING_*`), and CLI flags. Opens the selected backend, serves health/readiness (and, with the
//! `prometheus` feature, metrics) endpoints, and runs until graceful shutdown (SIGINT/SIGTERM).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use clap::Parser;
use config::{Config, Environment, File};
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tsring::index::SlotIndex;
use tsring::utils::{parse_duration, parse_options};
use tsring::{
    open_backend, MemoryStorage, Storage, StorageConfig, StorageError, StorageEvent,
    StorageEventListener,
};

#[cfg(feature = "prometheus")]
use tsring::telemetry::storage_metrics::InProcessPrometheus;

// ---------- CLI ----------

/// tsring metrics store daemon.
#[derive(Parser, Debug)]
#[command(name = "tsringd", version, about)]
pub struct Cli {
    /// Path to config file (TOML). If omitted, no file is loaded unless default path exists.
    #[arg(long, env = "TSRING_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false)]
    pub no_config: bool,

    /// Load and validate config (file + env + CLI), print effective settings, then exit. Does not open the backend.
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,

    /// HTTP listen address for health/readiness endpoints (e.g. 127.0.0.1:8080 or 0.0.0.0:8080).
    #[arg(long, env = "TSRING_HTTP_BIND")]
    pub http_bind: Option<String>,

    /// Storage backend: memory or example.
    #[arg(long)]
    pub storage: Option<String>,

    /// Backend option string (e.g. "granularity=30s&retention=1d"); "help" prints the backend's options.
    #[arg(long)]
    pub options: Option<String>,

    /// Memory backend granularity (e.g. 30s). Overrides the option string.
    #[arg(long)]
    pub granularity: Option<String>,

    /// Memory backend retention (e.g. 1d). Overrides the option string.
    #[arg(long)]
    pub retention: Option<String>,

    /// Seconds between memory backend retention sweeps.
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,
}

// ---------- File/env config (all optional for partial config) ----------

/// Top-level daemon config as read from file + env. Every field optional for layering.
#[derive(Debug, Default, serde::Deserialize)]
pub struct DaemonFileConfig {
    /// HTTP listen address for /healthz and /readyz (e.g. "127.0.0.1:8080").
    pub http_bind: Option<String>,
    pub storage: Option<String>,
    pub options: Option<String>,
    pub granularity: Option<String>,
    pub retention: Option<String>,
    pub sweep_interval_secs: Option<u64>,
}

/// Effective settings after layering defaults, file, env and CLI.
#[derive(Debug)]
pub struct DaemonSettings {
    pub storage: String,
    pub options: String,
    /// Memory backend configuration; ignored by other backends.
    pub memory: StorageConfig,
    /// Address to bind the HTTP health/readiness server.
    pub http_bind: SocketAddr,
}

impl DaemonSettings {
    fn wants_help(&self) -> bool {
        self.options == "help"
    }
}

/// Parse `http_bind` string to `SocketAddr`. Returns error message on failure.
fn parse_http_bind(s: &str) -> Result<SocketAddr, String> {
    s.parse::<SocketAddr>()
        .map_err(|e| format!("invalid http_bind {:?}: {}", s, e))
}

/// Load merged config. CLI overrides file/env.
fn load_daemon_config(cli: &Cli) -> Result<DaemonSettings, String> {
    let mut builder = Config::builder();

    if !cli.no_config {
        if let Some(ref path) = cli.config {
            if !path.exists() {
                return Err(format!("config file not found: {}", path.display()));
            }
            builder = builder.add_source(File::from(path.as_path()).required(false));
        } else {
            let default_path = PathBuf::from("tsringd.toml");
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path.as_path()).required(false));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("TSRING")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder.build().map_err(|e| e.to_string())?;
    let partial: DaemonFileConfig = merged.try_deserialize().map_err(|e| e.to_string())?;

    let storage = cli
        .storage
        .clone()
        .or(partial.storage)
        .unwrap_or_else(|| "memory".to_string());
    let options = cli
        .options
        .clone()
        .or(partial.options)
        .unwrap_or_default();

    let mut memory = if options == "help" || storage != "memory" {
        StorageConfig::default()
    } else {
        StorageConfig::from_options(&options).map_err(|e| e.to_string())?
    };
    if let Some(s) = cli.granularity.as_deref().or(partial.granularity.as_deref()) {
        memory.granularity = parse_duration(s).map_err(|e| e.to_string())?;
    }
    if let Some(s) = cli.retention.as_deref().or(partial.retention.as_deref()) {
        memory.retention = parse_duration(s).map_err(|e| e.to_string())?;
    }
    if let Some(secs) = cli.sweep_interval_secs.or(partial.sweep_interval_secs) {
        memory.sweep_interval = Duration::from_secs(secs);
    }
    memory.event_listener = Arc::new(TracingEventListener);

    let http_bind_str = cli
        .http_bind
        .as_deref()
        .or(partial.http_bind.as_deref())
        .unwrap_or("127.0.0.1:8080");
    let http_bind = parse_http_bind(http_bind_str)?;

    let settings = DaemonSettings {
        storage,
        options,
        memory,
        http_bind,
    };
    validate_settings(&settings)?;
    Ok(settings)
}

/// Checks the backend settings without opening the backend.
fn validate_settings(settings: &DaemonSettings) -> Result<(), String> {
    if settings.wants_help() {
        return Ok(());
    }
    match settings.storage.as_str() {
        "memory" => {
            SlotIndex::new(settings.memory.granularity, settings.memory.retention)
                .map_err(|e| e.to_string())?;
            if settings.memory.sweep_interval.is_zero() {
                return Err("sweep_interval_secs must be greater than zero".to_string());
            }
            Ok(())
        }
        "example" => parse_options(&settings.options)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        other => Err(StorageError::UnknownBackend(other.to_string()).to_string()),
    }
}

fn open_storage(settings: &DaemonSettings) -> Result<Box<dyn Storage>, StorageError> {
    match settings.storage.as_str() {
        "memory" => Ok(Box::new(MemoryStorage::with_config(settings.memory.clone())?)),
        other => open_backend(other, &settings.options),
    }
}

// ---------- Logging ----------

fn init_logging() -> Result<(), String> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| format!("failed to initialize logging: {}", e))
}

/// Forwards storage engine events to `tracing`.
#[derive(Debug)]
struct TracingEventListener;

impl StorageEventListener for TracingEventListener {
    fn on_event(&self, event: StorageEvent) {
        match event {
            StorageEvent::SweepThreadStarted => tracing::debug!("retention sweeper started"),
            StorageEvent::SweepThreadStopping => tracing::debug!("retention sweeper stopping"),
            StorageEvent::SweepThreadPanicked => tracing::error!("retention sweeper panicked"),
            StorageEvent::SeriesExpired { tenant, id } => {
                tracing::debug!(%tenant, %id, "series expired")
            }
            StorageEvent::SweepCompleted {
                removed,
                remaining,
                duration,
            } => tracing::info!(
                removed,
                remaining,
                duration_ms = duration.as_millis() as u64,
                "retention sweep completed"
            ),
            StorageEvent::SweepFailed { error } => {
                tracing::warn!(%error, "retention sweep failed")
            }
        }
    }
}

// ---------- Health HTTP server ----------

/// Shared state for the health service.
struct HealthState {
    ready: Arc<AtomicBool>,
    #[cfg(feature = "prometheus")]
    metrics: Option<InProcessPrometheus>,
}

async fn health_service(
    state: Arc<HealthState>,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, body) = match (req.method(), req.uri().path()) {
        (&hyper::Method::GET, "/healthz") => {
            // Liveness: process is alive and responding.
            (StatusCode::OK, Bytes::from("ok"))
        }
        (&hyper::Method::GET, "/readyz") => {
            // Readiness: backend opened; safe to send traffic.
            if state.ready.load(Ordering::Acquire) {
                (StatusCode::OK, Bytes::from("ok"))
            } else {
                (StatusCode::SERVICE_UNAVAILABLE, Bytes::from("not ready"))
            }
        }
        #[cfg(feature = "prometheus")]
        (&hyper::Method::GET, "/metrics") => match &state.metrics {
            Some(metrics) => (StatusCode::OK, Bytes::from(metrics.render())),
            None => (StatusCode::NOT_FOUND, Bytes::from("metrics disabled")),
        },
        _ => (StatusCode::NOT_FOUND, Bytes::from("not found")),
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    Ok(response)
}

/// Returns a future that completes when SIGINT (Ctrl+C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl_c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Runs the daemon: spawns the health HTTP server, waits for shutdown signal, then drops the
/// backend (stopping its sweeper).
async fn run_with_health_server(
    storage: Box<dyn Storage>,
    http_bind: SocketAddr,
    state: HealthState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(http_bind)
        .await
        .map_err(|e| format!("failed to bind {}: {}", http_bind, e))?;
    tracing::info!(
        storage = storage.name(),
        http = %http_bind,
        "tsringd running. Press Ctrl+C or send SIGTERM to stop."
    );

    let state = Arc::new(state);
    let graceful = GracefulShutdown::new();
    let mut shutdown = std::pin::pin!(shutdown_signal());

    loop {
        tokio::select! {
            Ok((stream, _addr)) = listener.accept() => {
                let io = TokioIo::new(stream);
                let state = Arc::clone(&state);
                let conn = http1::Builder::new().serve_connection(io, service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { health_service(state, req).await }
                }));
                let fut = graceful.watch(conn);
                tokio::spawn(async move {
                    if let Err(e) = fut.await {
                        tracing::debug!(error = ?e, "health connection error");
                    }
                });
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    state.ready.store(false, Ordering::Release);
    drop(listener);
    const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
    tokio::select! {
        _ = graceful.shutdown() => {
            tracing::info!("all health connections closed");
        }
        _ = tokio::time::sleep(SHUTDOWN_TIMEOUT) => {
            tracing::warn!("shutdown timeout waiting for connections");
        }
    }

    tracing::info!("stopping {} backend", storage.name());
    drop(storage);
    tracing::info!("shutdown complete");
    Ok(())
}

// ---------- Main ----------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    init_logging()?;

    let settings = load_daemon_config(&cli).map_err(|e| {
        tracing::error!("config error: {}", e);
        e
    })?;

    if settings.wants_help() {
        let storage = open_backend(&settings.storage, "").map_err(|e| {
            tracing::error!("config error: {}", e);
            e
        })?;
        println!("{}", storage.help());
        return Ok(());
    }

    if cli.validate_config {
        println!("storage={}", settings.storage);
        println!("options={}", settings.options);
        println!("granularity_secs={}", settings.memory.granularity.as_secs());
        println!("retention_secs={}", settings.memory.retention.as_secs());
        println!("sweep_interval_secs={}", settings.memory.sweep_interval.as_secs());
        println!("http_bind={}", settings.http_bind);
        return Ok(());
    }

    let storage = open_storage(&settings).map_err(|e| {
        tracing::error!("failed to open {} backend: {}", settings.storage, e);
        e
    })?;

    #[cfg(feature = "prometheus")]
    let metrics = match InProcessPrometheus::install(Duration::from_secs(5)) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "metrics disabled");
            None
        }
    };

    let state = HealthState {
        ready: Arc::new(AtomicBool::new(true)),
        #[cfg(feature = "prometheus")]
        metrics,
    };
    run_with_health_server(storage, settings.http_bind, state).await
}
