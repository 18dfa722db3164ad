//! Subgraph Monitor - Main Entry Point

use api::{init_logging, install_metrics, run, Settings};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_logging(&settings.log_level, settings.log_json)?;

    info!("=== Subgraph Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        poll_interval = ?settings.poll_interval(),
        flush_interval = ?settings.flush_interval(),
        lag_threshold = settings.lag_threshold,
        api_keys = settings.api_keys.len(),
        "Settings loaded"
    );

    let metrics = match install_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    run(settings, metrics).await
}
