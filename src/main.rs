// =============================================================================
// Entry point — wires C1-C12 and starts the HTTP/WebSocket host.
// =============================================================================
//
// Engine starts in whatever `trading_mode`/`account_mode` the config file
// says, defaulting to Paused + Demo (see `config::RuntimeConfig::default`) if
// no config file exists yet. Flipping to Live is an explicit config/API
// action, never an implicit one taken here.
// =============================================================================

mod api;
mod app_state;
mod collector;
mod config;
mod error;
mod exchange;
mod execution_log;
mod executor;
mod indicators;
mod jobs;
mod paper;
mod realtime;
mod router;
mod scheduler;
mod signal;
mod store;
mod strategy;
mod symbols;
mod types;

use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("aurora-core starting up");

    let config_path = PathBuf::from(std::env::var("AURORA_CONFIG_PATH").unwrap_or_else(|_| "runtime_config.json".to_string()));
    let config = config::RuntimeConfig::load_or_default(&config_path);

    info!(
        symbols = ?config.symbols,
        trading_mode = %config.trading_mode,
        account_mode = %config.account_mode,
        scheduler_backend = ?config.scheduler_backend,
        "runtime config loaded"
    );

    let state = AppState::new(config, config_path);

    let now = chrono::Utc::now().timestamp_millis();
    state.register_handlers(now).await;
    state.reconcile_jobs(now);
    state.scheduler.start();

    let bind_addr = std::env::var("AURORA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                warn!(error = %e, "API server exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received — stopping gracefully");
        }
    }

    state.scheduler.shutdown(true).await;
    if let Err(e) = state.config.read().save(&state.config_path) {
        warn!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("aurora-core shut down complete");
    Ok(())
}
