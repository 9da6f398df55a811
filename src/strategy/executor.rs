// =============================================================================
// Strategy executor engine (C8)
// =============================================================================
//
// The per-strategy tick pipeline: load candles, recompute indicators,
// evaluate the handler, persist the signal, route an order if the strategy
// isn't advisory-only, publish a notification. `ExecuteStrategyHandler`
// bridges this into C6/C7 by implementing `scheduler::JobHandler`, the same
// way `jobs.rs`'s other named handlers (`collect_data`, ...) do.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::execution_log::{ExecutionLogStore, JobExecutionLog};
use crate::indicators::engine::recompute_latest;
use crate::paper::PaperEngine;
use crate::realtime::{Envelope, RealtimeHub, Topic};
use crate::router::TradingRouter;
use crate::scheduler::trigger::IntervalSpec;
use crate::scheduler::{HandlerOutcome, JobHandler, Scheduler, ScheduledJob, Trigger};
use crate::signal::{Signal, SignalAction};
use crate::store::{CandleStore, IndicatorStore, Order};
use crate::types::{OrderType, TradingCore};

use super::handler::{StrategyContext, StrategyHandler};
use super::signal_store::SignalStore;
use super::{Strategy, StrategyExecution, StrategyRegistry, StrategyStatus};

/// Candles loaded per tick when a strategy doesn't override it in
/// `parameters.candle_window`. Comfortably covers every built-in handler's
/// longest lookback (EMA-26 plus its signal-line smoothing).
const DEFAULT_CANDLE_WINDOW: usize = 100;
/// Minimum candles before a tick is evaluated at all, below which no
/// indicator in the built-in set can compute a meaningful value.
const MIN_CANDLES: usize = 30;
const ERROR_BUDGET_FAILURES: u32 = 5;
const ERROR_BUDGET_WINDOW_S: i64 = 600;

pub struct StrategyEngine {
    registry: Arc<StrategyRegistry>,
    candles: Arc<CandleStore>,
    indicators: Arc<IndicatorStore>,
    signals: Arc<SignalStore>,
    paper: Arc<PaperEngine>,
    router: Arc<TradingRouter>,
    hub: Arc<RealtimeHub>,
    handlers: HashMap<String, Arc<dyn StrategyHandler>>,
    logs: Arc<ExecutionLogStore>,
}

impl StrategyEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<StrategyRegistry>,
        candles: Arc<CandleStore>,
        indicators: Arc<IndicatorStore>,
        signals: Arc<SignalStore>,
        paper: Arc<PaperEngine>,
        router: Arc<TradingRouter>,
        hub: Arc<RealtimeHub>,
        handlers: HashMap<String, Arc<dyn StrategyHandler>>,
        logs: Arc<ExecutionLogStore>,
    ) -> Self {
        Self { registry, candles, indicators, signals, paper, router, hub, handlers, logs }
    }

    /// Append an immediately-complete row recording a strategy lifecycle
    /// transition, distinct from the job-run rows `tick` produces indirectly
    /// through the scheduler. `job_name` is the strategy id so transitions
    /// and ticks for the same strategy line up under one filter.
    fn log_transition(&self, strategy_id: Uuid, transition: &str, now: i64) {
        let mut log = JobExecutionLog::start(strategy_id.to_string(), "strategy_transition", None, now);
        log.complete(now, 0, Some(serde_json::json!({ "transition": transition })));
        self.logs.append(log);
    }

    fn log_transition_error(&self, strategy_id: Uuid, transition: &str, reason: impl Into<String>, now: i64) {
        let mut log = JobExecutionLog::start(strategy_id.to_string(), "strategy_transition", None, now);
        log.fail(now, format!("{transition}: {}", reason.into()));
        self.logs.append(log);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_strategy(
        &self,
        owner: impl Into<String>,
        handler_name: impl Into<String>,
        parameters: serde_json::Value,
        symbol: impl Into<String>,
        timeframe: crate::types::Timeframe,
        initial_balance: Decimal,
        commission_rate: Decimal,
        execution: StrategyExecution,
        max_position_size_pct: f64,
        now: i64,
    ) -> CoreResult<Strategy> {
        let handler_name = handler_name.into();
        if !self.handlers.contains_key(&handler_name) {
            return Err(CoreError::BadRequest(format!("unknown strategy handler {handler_name}")));
        }
        let portfolio = self.paper.create_portfolio(owner.into(), initial_balance);
        let strategy = Strategy::new(
            portfolio.owner.clone(),
            handler_name,
            parameters,
            symbol,
            timeframe,
            initial_balance,
            commission_rate,
            execution,
            max_position_size_pct,
            portfolio.id,
            now,
        );
        self.registry.upsert(strategy.clone());
        Ok(strategy)
    }

    pub fn get(&self, id: Uuid) -> CoreResult<Strategy> {
        self.registry.get(id).ok_or_else(|| CoreError::NotFound(format!("strategy {id} not found")))
    }

    pub fn list(&self) -> Vec<Strategy> {
        self.registry.list()
    }

    /// `inactive → active`, creating the scheduler job in the same call.
    pub fn start(&self, scheduler: &Scheduler, id: Uuid, now: i64) -> CoreResult<Strategy> {
        let mut strategy = self.get(id)?;
        if !strategy.start() {
            let err = format!("strategy {id} cannot start from {}", strategy.status);
            self.log_transition_error(id, "start", err.clone(), now);
            return Err(CoreError::Conflict(err));
        }
        self.registry.upsert(strategy.clone());
        let interval_s = strategy.timeframe.seconds().max(1) as u32;
        let trigger = Trigger::Interval(IntervalSpec { days: 0, hours: 0, minutes: 0, seconds: interval_s });
        let job = ScheduledJob::new(strategy.job_id(), "execute_strategy", trigger, serde_json::json!({"strategy_id": strategy.id}), now);
        scheduler.add_job(job);
        self.log_transition(id, "start", now);
        Ok(strategy)
    }

    pub fn pause(&self, id: Uuid, now: i64) -> CoreResult<Strategy> {
        let mut strategy = self.get(id)?;
        if !strategy.pause() {
            let err = format!("strategy {id} cannot pause from {}", strategy.status);
            self.log_transition_error(id, "pause", err.clone(), now);
            return Err(CoreError::Conflict(err));
        }
        self.registry.upsert(strategy.clone());
        self.log_transition(id, "pause", now);
        Ok(strategy)
    }

    pub fn resume(&self, id: Uuid, now: i64) -> CoreResult<Strategy> {
        let mut strategy = self.get(id)?;
        if !strategy.resume() {
            let err = format!("strategy {id} cannot resume from {}", strategy.status);
            self.log_transition_error(id, "resume", err.clone(), now);
            return Err(CoreError::Conflict(err));
        }
        self.registry.upsert(strategy.clone());
        self.log_transition(id, "resume", now);
        Ok(strategy)
    }

    /// Any state → `inactive`, removing the scheduler job in the same call.
    pub fn stop(&self, scheduler: &Scheduler, id: Uuid, now: i64) -> CoreResult<Strategy> {
        let mut strategy = self.get(id)?;
        strategy.stop();
        self.registry.upsert(strategy.clone());
        scheduler.remove_job(&strategy.job_id());
        self.log_transition(id, "stop", now);
        Ok(strategy)
    }

    /// Run one tick for `strategy_id`. Returns the persisted signal, or
    /// `None` when there wasn't enough data or the handler had no opinion.
    pub async fn tick(&self, strategy_id: Uuid, now: i64) -> CoreResult<Option<Signal>> {
        let strategy = self.get(strategy_id)?;
        if strategy.status != StrategyStatus::Active {
            return Ok(None);
        }

        let window = strategy.parameters.get("candle_window").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_CANDLE_WINDOW as u64) as usize;
        let mut candles = self.candles.range_candles(&strategy.symbol, strategy.timeframe, None, None, Some(window), Order::Descending);
        candles.reverse();
        if candles.len() < MIN_CANDLES {
            return Ok(None);
        }

        let handler = self.handlers.get(&strategy.handler_name).cloned().ok_or_else(|| CoreError::NotFound(format!("handler {} not registered", strategy.handler_name)))?;
        recompute_latest(&self.indicators, &strategy.symbol, strategy.timeframe, &candles);
        let ctx = StrategyContext::build(strategy.symbol.clone(), strategy.timeframe, candles, strategy.parameters.clone());

        let decision = match handler.evaluate(&ctx) {
            Ok(decision) => decision,
            Err(e) => {
                self.record_handler_failure(&strategy, now);
                return Err(e);
            }
        };
        self.registry.update(strategy.id, |s| s.record_success());

        let Some(decision) = decision else {
            return Ok(None);
        };

        let signal = Signal::new(
            strategy.id.to_string(),
            ctx.last_ts(),
            strategy.symbol.clone(),
            decision.action,
            decision.strength,
            decision.confidence,
            Decimal::try_from(ctx.last_close()).unwrap_or(Decimal::ZERO),
            decision.quantity,
            ctx.snapshot(),
            decision.reasoning.clone(),
        );
        self.signals.append(signal.clone());

        if signal.is_actionable() && !matches!(strategy.execution, StrategyExecution::Advisory) {
            self.route_order(&strategy, &signal).await;
        }

        self.hub.broadcast_to_subscribers(
            Topic::Notifications,
            Envelope::new("strategy_signal", serde_json::to_value(&signal).unwrap_or(serde_json::Value::Null), now),
        );

        Ok(Some(signal))
    }

    fn record_handler_failure(&self, strategy: &Strategy, now: i64) {
        let mut tripped = false;
        self.registry.update(strategy.id, |s| {
            tripped = s.record_failure(now, ERROR_BUDGET_FAILURES, ERROR_BUDGET_WINDOW_S);
        });
        if tripped {
            self.log_transition_error(strategy.id, "error", format!("handler error budget exhausted ({ERROR_BUDGET_FAILURES} failures in {ERROR_BUDGET_WINDOW_S}s)"), now);
        }
    }

    async fn route_order(&self, strategy: &Strategy, signal: &Signal) {
        let core = match strategy.execution {
            StrategyExecution::Paper => TradingCore::Paper,
            StrategyExecution::Live => TradingCore::Live,
            StrategyExecution::Advisory => return,
        };
        let result = match signal.action {
            SignalAction::Buy => {
                let quantity = match signal.quantity {
                    Some(q) => q,
                    None => self.default_buy_quantity(strategy, signal.price),
                };
                self.router.buy(core, strategy.portfolio_id, &strategy.symbol, quantity, None, OrderType::Market).await
            }
            SignalAction::Sell => match signal.quantity {
                Some(quantity) => self.router.sell(core, strategy.portfolio_id, &strategy.symbol, quantity, None, OrderType::Market).await,
                None => self.router.close_position(core, strategy.portfolio_id, &strategy.symbol).await,
            },
            SignalAction::Hold => return,
        };
        if let Err(e) = result {
            tracing::warn!(strategy_id = %strategy.id, symbol = %strategy.symbol, error = %e, "strategy order routing failed");
        }
    }

    fn default_buy_quantity(&self, strategy: &Strategy, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let budget = strategy.initial_balance * Decimal::try_from(strategy.max_position_size_pct).unwrap_or(Decimal::ZERO);
        (budget / price).round_dp(8)
    }
}

/// Bridges the scheduler into `StrategyEngine::tick`. Registered under the
/// name `execute_strategy`, same as the collector's and housekeeping's
/// named handlers.
pub struct ExecuteStrategyHandler {
    engine: Arc<StrategyEngine>,
}

impl ExecuteStrategyHandler {
    pub fn new(engine: Arc<StrategyEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for ExecuteStrategyHandler {
    async fn run(&self, args: serde_json::Value) -> CoreResult<HandlerOutcome> {
        let strategy_id = args
            .get("strategy_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| CoreError::BadRequest("execute_strategy job args missing strategy_id".into()))?;
        let now = Utc::now().timestamp_millis();
        let signal = self.engine.tick(strategy_id, now).await?;
        Ok(HandlerOutcome::new(signal.map_or(0, |_| 1)))
    }
}
