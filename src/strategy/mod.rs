// =============================================================================
// Strategy executor (C8)
// =============================================================================
//
// A pluggable `StrategyHandler` per `Strategy` row rather than one hardcoded
// ensemble. The tick pipeline is gather candles → compute indicators →
// evaluate → decide (see `executor.rs` in this module); the status machine
// follows `types.rs`'s enum-with-`Display` pattern.
// =============================================================================

pub mod executor;
pub mod handler;
pub mod handlers;
pub mod signal_store;

pub use executor::{ExecuteStrategyHandler, StrategyEngine};
pub use handler::{built_in_handlers, HandlerDecision, StrategyContext, StrategyHandler};
pub use signal_store::SignalStore;

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{atomic_write_json, read_json_or_default};
use crate::types::Timeframe;

/// Fixed built-in handler names — a closed set.
pub const BUILT_IN_HANDLER_NAMES: &[&str] = &["dca", "rsi", "macd", "ma_crossover", "bollinger_bands", "range_trading", "grid_trading", "fear_greed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    Inactive,
    Active,
    Paused,
    Error,
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Whether a tick's actionable signal is ever routed to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyExecution {
    /// Signals are persisted and published; no order is ever placed.
    Advisory,
    Paper,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub owner: String,
    pub handler_name: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub initial_balance: Decimal,
    pub commission_rate: Decimal,
    pub execution: StrategyExecution,
    /// Fraction of `initial_balance` a single default-sized buy may commit.
    pub max_position_size_pct: f64,
    /// The paper portfolio this strategy trades against — created once,
    /// alongside the strategy row, and reused across Paper-mode ticks.
    pub portfolio_id: Uuid,
    pub status: StrategyStatus,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub failures_in_window: Vec<i64>,
    pub created_at: i64,
}

impl Strategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: impl Into<String>,
        handler_name: impl Into<String>,
        parameters: serde_json::Value,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        initial_balance: Decimal,
        commission_rate: Decimal,
        execution: StrategyExecution,
        max_position_size_pct: f64,
        portfolio_id: Uuid,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            handler_name: handler_name.into(),
            parameters,
            symbol: symbol.into(),
            timeframe,
            initial_balance,
            commission_rate,
            execution,
            max_position_size_pct,
            portfolio_id,
            status: StrategyStatus::Inactive,
            consecutive_failures: 0,
            failures_in_window: Vec::new(),
            created_at,
        }
    }

    pub fn job_id(&self) -> String {
        format!("strategy:{}", self.id)
    }

    /// `inactive → active`. Only legal from `Inactive`.
    pub fn start(&mut self) -> bool {
        if self.status == StrategyStatus::Inactive {
            self.status = StrategyStatus::Active;
            true
        } else {
            false
        }
    }

    /// `active → paused`. Only legal from `Active`.
    pub fn pause(&mut self) -> bool {
        if self.status == StrategyStatus::Active {
            self.status = StrategyStatus::Paused;
            true
        } else {
            false
        }
    }

    /// `paused → active` or `error → active` (explicit recovery).
    pub fn resume(&mut self) -> bool {
        if matches!(self.status, StrategyStatus::Paused | StrategyStatus::Error) {
            self.status = StrategyStatus::Active;
            self.consecutive_failures = 0;
            self.failures_in_window.clear();
            true
        } else {
            false
        }
    }

    /// Any state → `inactive`.
    pub fn stop(&mut self) -> bool {
        let changed = self.status != StrategyStatus::Inactive;
        self.status = StrategyStatus::Inactive;
        changed
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Mirrors the scheduler's own error-budget bookkeeping
    /// (`scheduler/mod.rs::record_failure`), scoped to "handler evaluation
    /// failures" instead of "job dispatch failures". Returns `true` if this
    /// failure tripped the breaker.
    pub fn record_failure(&mut self, at: i64, budget_failures: u32, budget_window_s: i64) -> bool {
        let window_start = at - budget_window_s * 1000;
        self.consecutive_failures += 1;
        self.failures_in_window.push(at);
        self.failures_in_window.retain(|&t| t >= window_start);
        if self.failures_in_window.len() as u32 >= budget_failures {
            self.status = StrategyStatus::Error;
            true
        } else {
            false
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct StrategyDocument {
    strategies: HashMap<Uuid, Strategy>,
}

/// Durable strategy table, mirroring `scheduler/registry.rs`'s atomic
/// tmp+rename persistence idiom.
pub struct StrategyRegistry {
    path: Option<PathBuf>,
    strategies: RwLock<HashMap<Uuid, Strategy>>,
}

impl StrategyRegistry {
    pub fn new(path: Option<PathBuf>) -> Self {
        let strategies = path
            .as_ref()
            .map(|p| read_json_or_default::<StrategyDocument>(p).strategies)
            .unwrap_or_default();
        Self {
            path,
            strategies: RwLock::new(strategies),
        }
    }

    fn persist(&self, strategies: &HashMap<Uuid, Strategy>) {
        if let Some(path) = &self.path {
            let _ = atomic_write_json(path, &StrategyDocument { strategies: strategies.clone() });
        }
    }

    pub fn upsert(&self, strategy: Strategy) {
        let mut strategies = self.strategies.write();
        strategies.insert(strategy.id, strategy);
        self.persist(&strategies);
    }

    pub fn remove(&self, id: Uuid) -> Option<Strategy> {
        let mut strategies = self.strategies.write();
        let removed = strategies.remove(&id);
        if removed.is_some() {
            self.persist(&strategies);
        }
        removed
    }

    pub fn get(&self, id: Uuid) -> Option<Strategy> {
        self.strategies.read().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Strategy> {
        self.strategies.read().values().cloned().collect()
    }

    pub fn list_active(&self) -> Vec<Strategy> {
        self.strategies.read().values().filter(|s| s.status == StrategyStatus::Active).cloned().collect()
    }

    /// Mutate a strategy in place via `f`, persisting the result. No-op if
    /// the strategy does not exist.
    pub fn update<F: FnOnce(&mut Strategy)>(&self, id: Uuid, f: F) {
        let mut strategies = self.strategies.write();
        if let Some(strategy) = strategies.get_mut(&id) {
            f(strategy);
            self.persist(&strategies);
        }
    }
}
