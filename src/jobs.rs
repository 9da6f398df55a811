// =============================================================================
// Named scheduler handlers (C6/C7 bridge)
// =============================================================================
//
// The four housekeeping handlers `ensure_default_jobs` (and, for
// `collect_data`, `collector::DataCollectionManager::start`) wire into the
// scheduler by name. Each is a thin `JobHandler` adapter over an existing
// component, the same pattern `strategy/executor.rs::ExecuteStrategyHandler`
// establishes for `execute_strategy`.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::collector::{DataCollectionRegistry, DataCollector};
use crate::config::RuntimeConfig;
use crate::error::{CoreError, CoreResult};
use crate::exchange::ExchangeAdapter;
use crate::execution_log::ExecutionLogStore;
use crate::scheduler::{HandlerOutcome, JobHandler};
use crate::store::{CandleStore, IndicatorStore};
use crate::strategy::SignalStore;

const MS_PER_DAY: i64 = 86_400_000;

/// `collect_data` — runs one `DataCollector` pass for the config named in
/// `args.config_id`.
pub struct CollectDataHandler {
    registry: Arc<DataCollectionRegistry>,
    collector: Arc<DataCollector>,
}

impl CollectDataHandler {
    pub fn new(registry: Arc<DataCollectionRegistry>, collector: Arc<DataCollector>) -> Self {
        Self { registry, collector }
    }
}

#[async_trait]
impl JobHandler for CollectDataHandler {
    async fn run(&self, args: serde_json::Value) -> CoreResult<HandlerOutcome> {
        let config_id = args
            .get("config_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| CoreError::BadRequest("collect_data job args missing config_id".into()))?;
        let config = self.registry.get(config_id).ok_or_else(|| CoreError::NotFound(format!("data collection config {config_id} not found")))?;
        let records = self.collector.collect(&config).await?;
        Ok(HandlerOutcome::new(records))
    }
}

/// `refresh_symbols` — forces a `SymbolRegistry` refresh from the venue.
pub struct RefreshSymbolsHandler {
    symbols: Arc<crate::symbols::SymbolRegistry>,
}

impl RefreshSymbolsHandler {
    pub fn new(symbols: Arc<crate::symbols::SymbolRegistry>) -> Self {
        Self { symbols }
    }
}

#[async_trait]
impl JobHandler for RefreshSymbolsHandler {
    async fn run(&self, _args: serde_json::Value) -> CoreResult<HandlerOutcome> {
        let count = self.symbols.refresh().await?;
        Ok(HandlerOutcome::new(count as u64))
    }
}

/// `cleanup_old_data` — prunes every retention-bounded table per the
/// configured retention windows. Runs unconditionally over all four tables;
/// a zero-row table simply contributes zero to the total.
pub struct CleanupOldDataHandler {
    config: Arc<RwLock<RuntimeConfig>>,
    candles: Arc<CandleStore>,
    indicators: Arc<IndicatorStore>,
    signals: Arc<SignalStore>,
    logs: Arc<ExecutionLogStore>,
}

impl CleanupOldDataHandler {
    pub fn new(config: Arc<RwLock<RuntimeConfig>>, candles: Arc<CandleStore>, indicators: Arc<IndicatorStore>, signals: Arc<SignalStore>, logs: Arc<ExecutionLogStore>) -> Self {
        Self { config, candles, indicators, signals, logs }
    }
}

#[async_trait]
impl JobHandler for CleanupOldDataHandler {
    async fn run(&self, _args: serde_json::Value) -> CoreResult<HandlerOutcome> {
        let now = chrono::Utc::now().timestamp_millis();
        let (candle_days, indicator_days, signal_days, job_log_days) = {
            let cfg = self.config.read();
            (cfg.candle_retention_days, cfg.indicator_retention_days, cfg.signal_retention_days, cfg.job_log_retention_days)
        };

        let removed_candles = self.candles.delete_before(now - candle_days * MS_PER_DAY);
        let removed_indicators = self.indicators.delete_before(now - indicator_days * MS_PER_DAY);
        let removed_signals = self.signals.delete_before(now - signal_days * MS_PER_DAY);
        let removed_logs = self.logs.delete_before(now - job_log_days * MS_PER_DAY);

        let total = (removed_candles + removed_indicators + removed_signals + removed_logs) as u64;
        let metadata = serde_json::json!({
            "removed_candles": removed_candles,
            "removed_indicators": removed_indicators,
            "removed_signals": removed_signals,
            "removed_job_logs": removed_logs,
        });
        Ok(HandlerOutcome::with_metadata(total, metadata))
    }
}

/// `health_check` — confirms the exchange is reachable by pricing one
/// heartbeat symbol. A failure here counts against the job's own error
/// budget, not any strategy's, so a flaky venue trips `health_check` into
/// `Error` state without touching unrelated jobs.
pub struct HealthCheckHandler {
    exchange: Arc<dyn ExchangeAdapter>,
    heartbeat_symbol: String,
}

impl HealthCheckHandler {
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, heartbeat_symbol: impl Into<String>) -> Self {
        Self { exchange, heartbeat_symbol: heartbeat_symbol.into() }
    }
}

#[async_trait]
impl JobHandler for HealthCheckHandler {
    async fn run(&self, _args: serde_json::Value) -> CoreResult<HandlerOutcome> {
        self.exchange.fetch_ticker(&self.heartbeat_symbol).await?;
        Ok(HandlerOutcome::new(1))
    }
}
