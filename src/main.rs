use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gatekeeper::audit::{AuditChain, AuditSink, DecisionLog, TracingAuditSink};
use gatekeeper::config::settings::{LoggingConfig, Settings, StorageBackend, StorageConfig};
use gatekeeper::maintenance::{cleanup_loop, Sweeper};
use gatekeeper::protection::click_velocity::ClickVelocityDetector;
use gatekeeper::protection::escalator::ViolationEscalator;
use gatekeeper::protection::gate::AdmissionGate;
use gatekeeper::protection::rate_limiter::{FixedWindowCounter, RateCounter};
use gatekeeper::server::{build_router, AppState};
use gatekeeper::storage::blocklist::{BlocklistBackend, BlocklistStore};
use gatekeeper::storage::journal::JournalBackend;
use gatekeeper::storage::sqlite::SqliteBackend;

/// Parse the `--config` CLI flag. Defaults to `config/gatekeeper.toml`.
fn parse_config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = String::from("config/gatekeeper.toml");

    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" {
            if let Some(path) = args.get(i + 1) {
                config_path = path.clone();
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    config_path
}

/// Initialise the `tracing` subscriber with stdout and a non-blocking file
/// writer. The returned guard flushes the file on drop.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<WorkerGuard> {
    let path = Path::new(&logging.file);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .context("logging.file must name a file")?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating log directory {}", dir.display()))?;

    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    let file_layer = fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},gatekeeper={}", logging.level, logging.level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// The configured blocklist backend. A SQLite database that cannot be opened
/// falls back to the journal so the service still starts.
fn open_backend(storage: &StorageConfig) -> Arc<dyn BlocklistBackend> {
    match storage.backend {
        StorageBackend::Journal => Arc::new(JournalBackend::new(&storage.journal_path)),
        StorageBackend::Sqlite => match SqliteBackend::open(&storage.sqlite_path) {
            Ok(db) => Arc::new(db),
            Err(e) => {
                error!(
                    path = %storage.sqlite_path,
                    error = %e,
                    fallback = %storage.journal_path,
                    "Failed to open SQLite blocklist; using journal backend"
                );
                Arc::new(JournalBackend::new(&storage.journal_path))
            }
        },
    }
}

fn build_audit(settings: &Settings) -> Arc<dyn AuditSink> {
    let mut chain = AuditChain::new().with(Arc::new(TracingAuditSink));
    if let Some(path) = settings.audit.decision_log.as_deref() {
        match DecisionLog::new(path) {
            Ok(log) => {
                info!(path, "Decision log enabled");
                chain = chain.with(Arc::new(log));
            }
            Err(e) => warn!(path, error = %e, "Failed to open decision log; continuing without it"),
        }
    }
    Arc::new(chain)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---------------------------------------------------------------
    // 1. Configuration
    // ---------------------------------------------------------------
    let config_path = parse_config_path();
    let settings = Settings::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    // ---------------------------------------------------------------
    // 2. Logging
    // ---------------------------------------------------------------
    let _log_guard = init_tracing(&settings.logging)?;

    info!("Starting gatekeeper admission layer");
    info!(path = %config_path, "Configuration loaded");
    if settings.admin_api.api_key == "change-me" {
        warn!("Admin API is using the default key; set admin_api.api_key");
    }

    // ---------------------------------------------------------------
    // 3. Storage and audit
    // ---------------------------------------------------------------
    let audit = build_audit(&settings);
    let backend = open_backend(&settings.storage);
    let blocklist = Arc::new(BlocklistStore::open(
        backend,
        audit.clone(),
        settings.storage.write_retries,
        Utc::now(),
    ));

    // ---------------------------------------------------------------
    // 4. Detectors
    // ---------------------------------------------------------------
    let rate_counter: Arc<dyn RateCounter> = Arc::new(FixedWindowCounter::new(&settings.rate_limit));
    let escalator = Arc::new(ViolationEscalator::new(
        &settings.escalation,
        blocklist.clone(),
        audit.clone(),
    ));
    let clicks = Arc::new(ClickVelocityDetector::new(
        &settings.click_velocity,
        blocklist.clone(),
        audit.clone(),
    ));
    let gate = Arc::new(AdmissionGate::new(
        blocklist.clone(),
        rate_counter.clone(),
        escalator.clone(),
        audit.clone(),
        settings.audit.log_admitted,
    ));

    info!(
        threshold = settings.escalation.violation_threshold,
        max_requests = settings.rate_limit.max_requests,
        window_ms = settings.rate_limit.window_ms,
        max_clicks = settings.click_velocity.max_clicks,
        "Admission gate initialised"
    );

    // ---------------------------------------------------------------
    // 5. Background maintenance
    // ---------------------------------------------------------------
    let sweeper = Sweeper {
        blocklist: blocklist.clone(),
        escalator,
        clicks: clicks.clone(),
        rate_counter,
    };
    let cleanup_handle = tokio::spawn(cleanup_loop(
        sweeper,
        Duration::from_secs(settings.cleanup_interval_secs),
    ));

    // ---------------------------------------------------------------
    // 6. HTTP
    // ---------------------------------------------------------------
    let app = build_router(AppState {
        gate,
        clicks,
        blocklist,
        api_key: settings.admin_api.api_key.clone(),
        start_time: Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("binding {}", settings.server.bind))?;
    info!(bind = %settings.server.bind, "Listening. Press Ctrl+C to shut down.");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
        .context("HTTP server error")?;

    info!("Shutting down gatekeeper...");
    cleanup_handle.abort();
    info!("Gatekeeper shut down gracefully");
    Ok(())
}
