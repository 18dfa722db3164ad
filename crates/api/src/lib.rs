//! Subgraph Monitor Server
//!
//! Wires the poll scheduler to its collaborators from [`Settings`] and serves
//! the status and administration API.

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_governor::GovernorLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod error;
mod rate_limit;
mod routes;
mod settings;

pub use error::ApiError;
pub use rate_limit::{create_governor_config, RateLimitConfig};
pub use settings::{default_sources, Settings, CONFIG_PATH_ENV};

use alerting::{AggregatorConfig, AlertAggregator, AlertStateMachine, LogSink, NotificationSink, WebhookSink};
use analyzer::RollingAnalyzer;
use attestation::{AttestationVerifier, GatewayLookup};
use probe::{CredentialChain, HttpTransport, SourceProbe, SourceRegistry};
use scheduler::{Heartbeat, PollScheduler, SchedulerConfig};
use storage::{KvStore, SampleLog, SqliteStore};

/// Application state shared across handlers
pub struct AppState {
    pub scheduler: Arc<PollScheduler>,
    /// Renders `/metrics`; absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(scheduler: Arc<PollScheduler>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            scheduler,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Result<Router, ApiError> {
    let lenient = create_governor_config(&RateLimitConfig::lenient())
        .ok_or_else(|| ApiError::Configuration("invalid read rate limit".to_string()))?;
    let strict = create_governor_config(&RateLimitConfig::strict())
        .ok_or_else(|| ApiError::Configuration("invalid admin rate limit".to_string()))?;

    let reads = Router::new()
        .route("/api/v1/health", get(routes::status::health))
        .route("/api/v1/status", get(routes::status::get_status))
        .route("/api/v1/analysis", get(routes::status::get_analysis))
        .route("/api/v1/analysis/:name", get(routes::status::get_window))
        .route("/api/v1/samples", get(routes::status::get_samples))
        .route("/api/v1/history", get(routes::reports::get_history))
        .route("/api/v1/reports", get(routes::reports::get_recent))
        .route("/api/v1/reports/latest", get(routes::reports::get_latest))
        .route("/api/v1/reports/:id", get(routes::reports::get_report))
        .layer(GovernorLayer { config: lenient });

    let admin = Router::new()
        .route("/api/v1/sources", post(routes::admin::add_source))
        .route("/api/v1/sources/:name", delete(routes::admin::remove_source))
        .route("/api/v1/subscribers", post(routes::admin::add_subscriber))
        .route("/api/v1/subscribers/:id", delete(routes::admin::remove_subscriber))
        .route("/api/v1/flush", post(routes::admin::flush))
        .layer(GovernorLayer { config: strict });

    Ok(Router::new()
        .merge(reads)
        .merge(admin)
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Initialize logging. `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level {level:?}"))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!(e))
}

/// Install the global Prometheus recorder
pub fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    describe_counter!("monitor_probes_total", "Probes by outcome");
    describe_counter!("monitor_alerts_enqueued_total", "Alert messages queued");
    describe_counter!("monitor_flushes_total", "Alert batches delivered");
    describe_gauge!("monitor_pending_alerts", "Alert messages waiting for a flush");
    describe_gauge!("monitor_sources_active", "Active sources probed in the last cycle");
    describe_histogram!("monitor_cycle_duration_seconds", "Poll cycle duration");
    Ok(handle)
}

/// Build the scheduler and everything it owns, restoring persisted state
pub async fn build_scheduler(settings: &Settings) -> anyhow::Result<Arc<PollScheduler>> {
    tokio::fs::create_dir_all(&settings.data_dir)
        .await
        .with_context(|| format!("failed to create {}", settings.data_dir.display()))?;

    let database = Arc::new(SqliteStore::connect(&settings.database_url()).await?);
    let store: Arc<dyn KvStore> = database.clone();
    let samples: Arc<dyn SampleLog> = database;

    let registry = Arc::new(SourceRegistry::load(settings.sources_file(), default_sources()).await?);

    let credentials = CredentialChain::from_keys(&settings.api_keys);
    if credentials.is_empty() {
        warn!("No gateway API keys configured; gateway sources will likely be rejected");
    }

    let lookup = GatewayLookup::new(
        &settings.gateway_base,
        &settings.network_subgraph_id,
        credentials.primary().map(|c| c.secret().to_string()),
        settings.request_timeout(),
    )?;
    let transport = HttpTransport::new(settings.rpc_urls.clone(), settings.request_timeout())?;
    let probe = SourceProbe::new(
        Arc::new(transport),
        credentials,
        AttestationVerifier::new(Arc::new(lookup)),
        settings.gateway_base.clone(),
    );

    let aggregator = Arc::new(
        AlertAggregator::load(
            store.clone(),
            AggregatorConfig {
                flush_interval: settings.flush_interval(),
                ..AggregatorConfig::default()
            },
        )
        .await?,
    );

    let sink: Arc<dyn NotificationSink> = match &settings.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone(), settings.request_timeout())?),
        None => {
            warn!("No webhook configured; alert batches will only be logged");
            Arc::new(LogSink)
        }
    };

    let scheduler = PollScheduler::new(
        SchedulerConfig {
            poll_interval: settings.poll_interval(),
            concurrency: settings.concurrency,
        },
        registry,
        probe,
        AlertStateMachine::new(store.clone(), settings.lag_threshold),
        RollingAnalyzer::new(settings.analysis_window),
        aggregator,
        sink,
        store,
        samples,
    );
    scheduler.restore().await;

    Ok(Arc::new(scheduler))
}

/// Run the poller, the heartbeat and the API server until shutdown
pub async fn run(settings: Settings, metrics: Option<PrometheusHandle>) -> anyhow::Result<()> {
    let scheduler = build_scheduler(&settings).await?;
    let cancel = CancellationToken::new();
    let mut tasks = vec![tokio::spawn(scheduler.clone().run(cancel.clone()))];

    if let Some(url) = &settings.heartbeat_url {
        let heartbeat = Heartbeat::new(url.clone(), settings.heartbeat_interval(), settings.request_timeout())?;
        tasks.push(tokio::spawn(heartbeat.run(cancel.clone())));
    }

    let app = create_router(Arc::new(AppState::new(scheduler, metrics)))?;
    let listener = tokio::net::TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_address))?;
    info!("Starting API server on {}", settings.bind_address);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task failed");
        }
    }
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM or cancellation, cancelling `cancel`
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
        () = cancel.cancelled() => {}
    }
    cancel.cancel();
}
