// =============================================================================
// Data collector (C5)
// =============================================================================
//
// For each enabled `DataCollectionConfig`, one pass: fetch candles for every
// configured timeframe, dedup-insert into C1, recompute indicators via C4,
// publish the latest candle via C12, and write a C11 execution log row.
// Transient exchange failures are retried with bounded backoff; everything
// else fails the run.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{atomic_write_json, read_json_or_default};
use crate::error::{retry_transient, CoreError, CoreResult};
use crate::exchange::ExchangeAdapter;
use crate::execution_log::{ExecutionLogStore, JobExecutionLog};
use crate::indicators::engine::recompute_latest;
use crate::realtime::{Envelope, RealtimeHub, Topic};
use crate::scheduler::trigger::IntervalSpec;
use crate::scheduler::{ScheduledJob, Scheduler, Trigger};
use crate::store::{CandleStore, IndicatorStore, UpsertOutcome};
use crate::types::Timeframe;

const DEFAULT_CANDLES_PER_FETCH: u32 = 100;
const RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCollectionConfig {
    pub id: Uuid,
    pub symbol: String,
    pub exchange: String,
    pub timeframes: Vec<Timeframe>,
    pub interval_s: u64,
    pub enabled: bool,
    pub job_id: Option<String>,
}

impl DataCollectionConfig {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>, timeframes: Vec<Timeframe>, interval_s: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            exchange: exchange.into(),
            timeframes,
            interval_s,
            enabled: true,
            job_id: None,
        }
    }

    pub fn job_id(&self) -> String {
        format!("collector:{}", self.id)
    }
}

#[derive(Default, Serialize, Deserialize)]
struct DataCollectionDocument {
    configs: HashMap<Uuid, DataCollectionConfig>,
}

/// Durable data-collection config table, mirroring
/// `strategy/mod.rs::StrategyRegistry`'s atomic tmp+rename persistence idiom.
pub struct DataCollectionRegistry {
    path: Option<PathBuf>,
    configs: RwLock<HashMap<Uuid, DataCollectionConfig>>,
}

impl DataCollectionRegistry {
    pub fn new(path: Option<PathBuf>) -> Self {
        let configs = path.as_ref().map(|p| read_json_or_default::<DataCollectionDocument>(p).configs).unwrap_or_default();
        Self {
            path,
            configs: RwLock::new(configs),
        }
    }

    fn persist(&self, configs: &HashMap<Uuid, DataCollectionConfig>) {
        if let Some(path) = &self.path {
            let _ = atomic_write_json(path, &DataCollectionDocument { configs: configs.clone() });
        }
    }

    pub fn upsert(&self, config: DataCollectionConfig) {
        let mut configs = self.configs.write();
        configs.insert(config.id, config);
        self.persist(&configs);
    }

    pub fn remove(&self, id: Uuid) -> Option<DataCollectionConfig> {
        let mut configs = self.configs.write();
        let removed = configs.remove(&id);
        if removed.is_some() {
            self.persist(&configs);
        }
        removed
    }

    pub fn get(&self, id: Uuid) -> Option<DataCollectionConfig> {
        self.configs.read().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<DataCollectionConfig> {
        self.configs.read().values().cloned().collect()
    }
}

/// Owns the config table and wires `start`/`stop` into the scheduler, the
/// same shape as `strategy::StrategyEngine::start`/`stop`.
pub struct DataCollectionManager {
    registry: Arc<DataCollectionRegistry>,
    collector: Arc<DataCollector>,
}

impl DataCollectionManager {
    pub fn new(registry: Arc<DataCollectionRegistry>, collector: Arc<DataCollector>) -> Self {
        Self { registry, collector }
    }

    pub fn create(&self, symbol: impl Into<String>, exchange: impl Into<String>, timeframes: Vec<Timeframe>, interval_s: u64) -> DataCollectionConfig {
        let config = DataCollectionConfig::new(symbol, exchange, timeframes, interval_s);
        self.registry.upsert(config.clone());
        config
    }

    pub fn get(&self, id: Uuid) -> CoreResult<DataCollectionConfig> {
        self.registry.get(id).ok_or_else(|| CoreError::NotFound(format!("data collection config {id} not found")))
    }

    pub fn list(&self) -> Vec<DataCollectionConfig> {
        self.registry.list()
    }

    /// Enable the config and register its interval job with the scheduler.
    pub fn start(&self, scheduler: &Scheduler, id: Uuid, now: i64) -> CoreResult<DataCollectionConfig> {
        let mut config = self.get(id)?;
        config.enabled = true;
        config.job_id = Some(config.job_id());
        self.registry.upsert(config.clone());

        let trigger = Trigger::Interval(IntervalSpec { days: 0, hours: 0, minutes: 0, seconds: config.interval_s.max(1) as u32 });
        let job = ScheduledJob::new(config.job_id(), "collect_data", trigger, serde_json::json!({"config_id": config.id}), now);
        scheduler.add_job(job);
        Ok(config)
    }

    /// Disable the config and remove its scheduler job.
    pub fn stop(&self, scheduler: &Scheduler, id: Uuid) -> CoreResult<DataCollectionConfig> {
        let mut config = self.get(id)?;
        config.enabled = false;
        self.registry.upsert(config.clone());
        scheduler.remove_job(&config.job_id());
        Ok(config)
    }

    pub fn remove(&self, scheduler: &Scheduler, id: Uuid) -> Option<DataCollectionConfig> {
        scheduler.remove_job(&format!("collector:{id}"));
        self.registry.remove(id)
    }

    pub fn collector(&self) -> Arc<DataCollector> {
        self.collector.clone()
    }
}

pub struct DataCollector {
    exchange: Arc<dyn ExchangeAdapter>,
    candles: Arc<CandleStore>,
    indicators: Arc<IndicatorStore>,
    realtime: Arc<RealtimeHub>,
    logs: Arc<ExecutionLogStore>,
    candles_per_fetch: u32,
}

impl DataCollector {
    pub fn new(
        exchange: Arc<dyn ExchangeAdapter>,
        candles: Arc<CandleStore>,
        indicators: Arc<IndicatorStore>,
        realtime: Arc<RealtimeHub>,
        logs: Arc<ExecutionLogStore>,
        candles_per_fetch: u32,
    ) -> Self {
        Self {
            exchange,
            candles,
            indicators,
            realtime,
            logs,
            candles_per_fetch: if candles_per_fetch == 0 { DEFAULT_CANDLES_PER_FETCH } else { candles_per_fetch },
        }
    }

    /// Run one collection pass for `config`. Always produces exactly one
    /// `JobExecutionLog` row, win or lose.
    pub async fn collect(&self, config: &DataCollectionConfig) -> CoreResult<u64> {
        let started_at = Utc::now().timestamp_millis();
        let mut log = JobExecutionLog::start("collect_data", "collector", Some(config.symbol.clone()), started_at);

        let outcome = self.run_pass(config).await;
        let finished_at = Utc::now().timestamp_millis();

        match outcome {
            Ok(records) => {
                log.complete(finished_at, records, None);
                self.logs.append(log);
                Ok(records)
            }
            Err(e) => {
                warn!(symbol = %config.symbol, error = %e, "data collection pass failed");
                log.fail(finished_at, e.to_string());
                self.logs.append(log);
                Err(e)
            }
        }
    }

    async fn run_pass(&self, config: &DataCollectionConfig) -> CoreResult<u64> {
        if !config.enabled {
            return Err(CoreError::BadRequest(format!("data collection config {} is disabled", config.id)));
        }

        let mut records_collected: u64 = 0;

        for &timeframe in &config.timeframes {
            let symbol = config.symbol.clone();
            let exchange = self.exchange.clone();
            let limit = self.candles_per_fetch;

            let candles = retry_transient(RETRY_ATTEMPTS, || {
                let symbol = symbol.clone();
                let exchange = exchange.clone();
                async move { exchange.fetch_klines(&symbol, timeframe, limit).await }
            })
            .await?;

            let mut inserted_any = false;
            for candle in candles {
                if !candle.is_valid() {
                    warn!(symbol = %config.symbol, ts = candle.ts_open, "dropping malformed candle");
                    continue;
                }
                if self.candles.upsert_candle(candle) == UpsertOutcome::Inserted {
                    records_collected += 1;
                    inserted_any = true;
                }
            }

            if inserted_any {
                let frame = self.candles.range_candles(&config.symbol, timeframe, None, None, None, crate::store::Order::Ascending);
                recompute_latest(&self.indicators, &config.symbol, timeframe, &frame);

                if let Some(latest) = self.candles.latest_candle(&config.symbol, timeframe) {
                    let data = serde_json::json!({
                        "symbol": latest.symbol,
                        "timeframe": timeframe.as_str(),
                        "close": latest.close,
                        "ts_open": latest.ts_open,
                    });
                    self.realtime.broadcast_to_subscribers(
                        Topic::MarketData,
                        Envelope::new("market_data", data, Utc::now().timestamp_millis()),
                    );
                }
            }
        }

        info!(symbol = %config.symbol, records_collected, "data collection pass complete");
        Ok(records_collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangeBalance, ExchangeTrade, OrderAck, SymbolInfo, Ticker};
    use crate::store::Candle;
    use crate::types::{OrderSide, OrderType};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeExchange {
        fail_n_times: AtomicU32,
        candle_count: usize,
    }

    fn candle(ts: i64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::M1,
            ts_open: ts,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(10),
            quote_volume: dec!(1000),
            trades: 5,
            taker_buy_volume: dec!(5),
            taker_buy_quote_volume: dec!(500),
        }
    }

    #[async_trait]
    impl ExchangeAdapter for FakeExchange {
        async fn fetch_klines(&self, _s: &str, _t: Timeframe, _l: u32) -> CoreResult<Vec<Candle>> {
            if self.fail_n_times.load(Ordering::SeqCst) > 0 {
                self.fail_n_times.fetch_sub(1, Ordering::SeqCst);
                return Err(CoreError::Transient("simulated outage".into()));
            }
            Ok((0..self.candle_count as i64).map(|i| candle(i * 60_000)).collect())
        }
        async fn fetch_ticker(&self, symbol: &str) -> CoreResult<Ticker> {
            Ok(Ticker { symbol: symbol.into(), last_price: dec!(1), volume_24h: dec!(1), quote_volume_24h: dec!(1), price_change_pct_24h: 0.0 })
        }
        async fn fetch_exchange_info(&self) -> CoreResult<Vec<SymbolInfo>> {
            Ok(Vec::new())
        }
        async fn fetch_24h_tickers(&self) -> CoreResult<Vec<Ticker>> {
            Ok(Vec::new())
        }
        async fn create_order(&self, _s: &str, _side: OrderSide, _t: OrderType, _q: Decimal, _p: Option<Decimal>) -> CoreResult<OrderAck> {
            Err(CoreError::NotImplemented("fake".into()))
        }
        async fn cancel_order(&self, _s: &str, _id: &str) -> CoreResult<()> {
            Err(CoreError::NotImplemented("fake".into()))
        }
        async fn get_balances(&self) -> CoreResult<Vec<ExchangeBalance>> {
            Ok(Vec::new())
        }
        async fn get_trades(&self, _s: &str, _l: u32) -> CoreResult<Vec<ExchangeTrade>> {
            Ok(Vec::new())
        }
    }

    fn collector(exchange: Arc<dyn ExchangeAdapter>) -> (DataCollector, Arc<CandleStore>, Arc<ExecutionLogStore>) {
        let candles = Arc::new(CandleStore::new());
        let indicators = Arc::new(IndicatorStore::new());
        let realtime = RealtimeHub::new();
        let logs = Arc::new(ExecutionLogStore::new(None));
        let dc = DataCollector::new(exchange, candles.clone(), indicators, realtime, logs.clone(), 100);
        (dc, candles, logs)
    }

    #[tokio::test]
    async fn collect_inserts_candles_and_logs_success() {
        let exchange = Arc::new(FakeExchange { fail_n_times: AtomicU32::new(0), candle_count: 60 });
        let (dc, candles, logs) = collector(exchange);
        let config = DataCollectionConfig::new("BTCUSDT", "binance", vec![Timeframe::M1], 60);
        let records = dc.collect(&config).await.unwrap();
        assert_eq!(records, 60);
        assert_eq!(candles.count("BTCUSDT", Timeframe::M1), 60);
        let rows = logs.recent(Some("collect_data"), 10);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].records_collected, Some(60));
    }

    #[tokio::test]
    async fn rerunning_collect_is_idempotent_on_candle_count() {
        let exchange = Arc::new(FakeExchange { fail_n_times: AtomicU32::new(0), candle_count: 60 });
        let (dc, candles, _logs) = collector(exchange);
        let config = DataCollectionConfig::new("BTCUSDT", "binance", vec![Timeframe::M1], 60);
        dc.collect(&config).await.unwrap();
        let second = dc.collect(&config).await.unwrap();
        assert_eq!(second, 0, "all candles already present, nothing new inserted");
        assert_eq!(candles.count("BTCUSDT", Timeframe::M1), 60);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_eventually_succeed() {
        let exchange = Arc::new(FakeExchange { fail_n_times: AtomicU32::new(2), candle_count: 60 });
        let (dc, candles, _logs) = collector(exchange);
        let config = DataCollectionConfig::new("BTCUSDT", "binance", vec![Timeframe::M1], 60);
        let records = dc.collect(&config).await.unwrap();
        assert_eq!(records, 60);
        assert_eq!(candles.count("BTCUSDT", Timeframe::M1), 60);
    }

    #[tokio::test]
    async fn disabled_config_fails_and_logs_failure() {
        let exchange = Arc::new(FakeExchange { fail_n_times: AtomicU32::new(0), candle_count: 10 });
        let (dc, _candles, logs) = collector(exchange);
        let mut config = DataCollectionConfig::new("BTCUSDT", "binance", vec![Timeframe::M1], 60);
        config.enabled = false;
        let result = dc.collect(&config).await;
        assert!(result.is_err());
        let rows = logs.recent(Some("collect_data"), 10);
        assert_eq!(rows[0].status, crate::execution_log::JobStatus::Failed);
    }

    #[tokio::test]
    async fn manager_start_registers_an_interval_job_and_stop_removes_it() {
        let exchange = Arc::new(FakeExchange { fail_n_times: AtomicU32::new(0), candle_count: 10 });
        let (dc, _candles, logs) = collector(exchange);
        let registry = Arc::new(DataCollectionRegistry::new(None));
        let manager = DataCollectionManager::new(registry, Arc::new(dc));
        let config = manager.create("BTCUSDT", "binance", vec![Timeframe::M1], 60);

        let job_registry = Arc::new(crate::scheduler::JobRegistry::new(None));
        let (scheduler, _consumer) = crate::scheduler::Scheduler::new(crate::config::SchedulerBackendKind::InProcess, 4, job_registry, logs, 5, 600);

        let started = manager.start(&scheduler, config.id, 0).unwrap();
        assert!(started.enabled);
        assert!(scheduler.get_job(&started.job_id()).is_some());

        let stopped = manager.stop(&scheduler, config.id).unwrap();
        assert!(!stopped.enabled);
        assert!(scheduler.get_job(&stopped.job_id()).is_none());
    }
}
