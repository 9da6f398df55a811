// =============================================================================
// Application state (C1-C12 wiring)
// =============================================================================
//
// One struct holding every long-lived service, constructed once at startup
// from `RuntimeConfig` and handed to the API layer as `Arc<AppState>`. Flat
// bag of `Arc`s, no locking beyond what each component already owns — the
// same shape this module has always had here.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

use crate::collector::{DataCollectionManager, DataCollectionRegistry, DataCollector};
use crate::config::RuntimeConfig;
use crate::exchange::{BinanceAdapter, ExchangeAdapter};
use crate::execution_log::ExecutionLogStore;
use crate::executor::JobExecutor;
use crate::jobs::{CleanupOldDataHandler, CollectDataHandler, HealthCheckHandler, RefreshSymbolsHandler};
use crate::paper::{PaperEngine, PortfolioRiskGate};
use crate::realtime::RealtimeHub;
use crate::router::TradingRouter;
use crate::scheduler::{ensure_default_jobs, JobRegistry, Scheduler};
use crate::store::{CandleStore, IndicatorStore};
use crate::strategy::{built_in_handlers, ExecuteStrategyHandler, SignalStore, StrategyEngine, StrategyRegistry};
use crate::symbols::SymbolRegistry;
use crate::types::AccountMode;

/// Portfolio risk-gate ceiling applied uniformly to every strategy's paper
/// portfolio. Paper trading has no real capital at risk, so the daily-loss
/// and consecutive-loss floors are generous rather than tuned per strategy.
const RISK_GATE_MAX_DRAWDOWN_PCT: f64 = 0.5;
const RISK_GATE_MAX_DAILY_LOSS: u64 = 100_000_000;
const RISK_GATE_MAX_CONSECUTIVE_LOSSES: u32 = 1000;

pub struct AppState {
    pub config: Arc<RwLock<RuntimeConfig>>,
    pub config_path: PathBuf,

    pub candles: Arc<CandleStore>,
    pub indicators: Arc<IndicatorStore>,
    pub exchange: Arc<dyn ExchangeAdapter>,
    pub symbols: Arc<SymbolRegistry>,

    pub data_collection: Arc<DataCollectionManager>,
    pub data_collection_registry: Arc<DataCollectionRegistry>,

    pub job_registry: Arc<JobRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub executor: Arc<JobExecutor>,

    pub strategy_registry: Arc<StrategyRegistry>,
    pub strategies: Arc<StrategyEngine>,
    pub signals: Arc<SignalStore>,

    pub paper: Arc<PaperEngine>,
    pub router: Arc<TradingRouter>,

    pub logs: Arc<ExecutionLogStore>,
    pub hub: Arc<RealtimeHub>,
}

impl AppState {
    pub fn new(config: RuntimeConfig, config_path: PathBuf) -> Arc<Self> {
        let data_dir = PathBuf::from(&config.data_dir);

        let candles = Arc::new(CandleStore::new());
        let indicators = Arc::new(IndicatorStore::new());

        let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
        let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
        let exchange: Arc<dyn ExchangeAdapter> = Arc::new(BinanceAdapter::new(api_key, api_secret, config.exchange_timeout_s));

        let symbols = Arc::new(SymbolRegistry::new(exchange.clone(), config.symbol_cache_ttl_s));

        let logs = Arc::new(ExecutionLogStore::new(Some(data_dir.join("execution_log.json"))));
        let hub = RealtimeHub::new();

        let data_collection_registry = Arc::new(DataCollectionRegistry::new(Some(data_dir.join("data_collection.json"))));
        let collector = Arc::new(DataCollector::new(
            exchange.clone(),
            candles.clone(),
            indicators.clone(),
            hub.clone(),
            logs.clone(),
            config.collector_candles_per_fetch,
        ));
        let data_collection = Arc::new(DataCollectionManager::new(data_collection_registry.clone(), collector));

        let job_registry = Arc::new(JobRegistry::new(Some(data_dir.join("jobs.json"))));
        let (scheduler, _out_of_process_consumer) = Scheduler::new(
            config.scheduler_backend,
            config.worker_pool_size,
            job_registry.clone(),
            logs.clone(),
            config.error_budget_failures,
            config.error_budget_window_s,
        );
        let executor = scheduler.executor();

        let signals = Arc::new(SignalStore::new(Some(data_dir.join("signals.json"))));
        let risk_gate = PortfolioRiskGate::new(RISK_GATE_MAX_DRAWDOWN_PCT, Decimal::from(RISK_GATE_MAX_DAILY_LOSS), RISK_GATE_MAX_CONSECUTIVE_LOSSES);
        let commission_rate = Decimal::from_f64(config.commission_rate).unwrap_or_default();
        let paper = Arc::new(PaperEngine::new(candles.clone(), commission_rate, risk_gate));

        let live_exchange: Option<Arc<dyn ExchangeAdapter>> = match config.account_mode {
            AccountMode::Live => Some(exchange.clone()),
            AccountMode::Demo => None,
        };
        let router = Arc::new(TradingRouter::new(paper.clone(), live_exchange));

        let strategy_registry = Arc::new(StrategyRegistry::new(Some(data_dir.join("strategies.json"))));
        let strategies = Arc::new(StrategyEngine::new(
            strategy_registry.clone(),
            candles.clone(),
            indicators.clone(),
            signals.clone(),
            paper.clone(),
            router.clone(),
            hub.clone(),
            built_in_handlers(),
            logs.clone(),
        ));

        let config = Arc::new(RwLock::new(config));

        Arc::new(Self {
            config,
            config_path,
            candles,
            indicators,
            exchange,
            symbols,
            data_collection,
            data_collection_registry,
            job_registry,
            scheduler,
            executor,
            strategy_registry,
            strategies,
            signals,
            paper,
            router,
            logs,
            hub,
        })
    }

    /// Register every named handler the scheduler can dispatch by name, then
    /// ensure the default housekeeping jobs exist. Call once at startup,
    /// before `scheduler.start()`.
    pub async fn register_handlers(self: &Arc<Self>, now: i64) {
        self.scheduler
            .register_handler("collect_data", Arc::new(CollectDataHandler::new(self.data_collection_registry.clone(), self.data_collection.collector())))
            .await;
        self.scheduler.register_handler("refresh_symbols", Arc::new(RefreshSymbolsHandler::new(self.symbols.clone()))).await;
        self.scheduler
            .register_handler(
                "cleanup_old_data",
                Arc::new(CleanupOldDataHandler::new(self.config.clone(), self.candles.clone(), self.indicators.clone(), self.signals.clone(), self.logs.clone())),
            )
            .await;

        let heartbeat_symbol = self.config.read().symbols.first().cloned().unwrap_or_else(|| "BTCUSDT".to_string());
        self.scheduler.register_handler("health_check", Arc::new(HealthCheckHandler::new(self.exchange.clone(), heartbeat_symbol))).await;
        self.scheduler.register_handler("execute_strategy", Arc::new(ExecuteStrategyHandler::new(self.strategies.clone()))).await;

        ensure_default_jobs(&self.scheduler, now);
    }

    /// Re-create the scheduler job for every enabled data-collection config
    /// and every active strategy. Job-registry persistence alone does not
    /// bring a `ScheduledJob` row back after a restart — only `start()` adds
    /// one — so this walks both tables once at boot.
    pub fn reconcile_jobs(&self, now: i64) {
        for config in self.data_collection_registry.list() {
            if config.enabled && self.scheduler.get_job(&config.job_id()).is_none() {
                if let Err(e) = self.data_collection.start(&self.scheduler, config.id, now) {
                    warn!(config_id = %config.id, error = %e, "failed to reconcile data collection job on boot");
                }
            }
        }
        for strategy in self.strategy_registry.list_active() {
            if self.scheduler.get_job(&strategy.job_id()).is_none() {
                if let Err(e) = self.strategies.start(&self.scheduler, strategy.id, now) {
                    warn!(strategy_id = %strategy.id, error = %e, "failed to reconcile strategy job on boot");
                }
            }
        }
    }
}
