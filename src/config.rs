// =============================================================================
// Runtime Configuration — hot-reloadable engine settings with atomic save
// =============================================================================
//
// Every tunable lives here so the engine can be reconfigured without a
// restart. Persistence uses an atomic tmp + rename pattern to prevent
// corruption on crash. All fields carry `#[serde(default)]` so that adding
// a new field never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{AccountMode, TradingMode};

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_commission_rate() -> f64 {
    0.001
}

fn default_symbol_cache_ttl_s() -> u64 {
    3600
}

fn default_candle_retention_days() -> i64 {
    30
}

fn default_indicator_retention_days() -> i64 {
    30
}

fn default_signal_retention_days() -> i64 {
    30
}

fn default_job_log_retention_days() -> i64 {
    30
}

fn default_news_retention_days() -> i64 {
    90
}

fn default_worker_pool_size() -> usize {
    20
}

fn default_max_instances() -> u32 {
    3
}

fn default_misfire_grace_s() -> i64 {
    60
}

fn default_error_budget_failures() -> u32 {
    5
}

fn default_error_budget_window_s() -> i64 {
    600
}

fn default_exchange_timeout_s() -> u64 {
    10
}

fn default_collector_k() -> u32 {
    100
}

fn default_data_dir() -> String {
    "./data".to_string()
}

/// Which scheduler backend drives job dispatch. The choice is made once at
/// startup and invisible to callers thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerBackendKind {
    InProcess,
    OutOfProcess,
}

impl Default for SchedulerBackendKind {
    fn default() -> Self {
        Self::InProcess
    }
}

/// Top-level runtime configuration for the Aurora core engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub account_mode: AccountMode,

    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Default commission rate applied to paper trades (e.g. 0.001 = 0.1%).
    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,

    /// Directory holding the atomically-written per-table JSON documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub scheduler_backend: SchedulerBackendKind,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_max_instances")]
    pub default_max_instances: u32,
    #[serde(default = "default_misfire_grace_s")]
    pub default_misfire_grace_s: i64,
    #[serde(default = "default_error_budget_failures")]
    pub error_budget_failures: u32,
    #[serde(default = "default_error_budget_window_s")]
    pub error_budget_window_s: i64,

    #[serde(default = "default_symbol_cache_ttl_s")]
    pub symbol_cache_ttl_s: u64,
    #[serde(default = "default_exchange_timeout_s")]
    pub exchange_timeout_s: u64,
    #[serde(default = "default_collector_k")]
    pub collector_candles_per_fetch: u32,

    #[serde(default = "default_candle_retention_days")]
    pub candle_retention_days: i64,
    #[serde(default = "default_indicator_retention_days")]
    pub indicator_retention_days: i64,
    #[serde(default = "default_signal_retention_days")]
    pub signal_retention_days: i64,
    #[serde(default = "default_job_log_retention_days")]
    pub job_log_retention_days: i64,
    #[serde(default = "default_news_retention_days")]
    pub news_retention_days: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Demo,
            symbols: default_symbols(),
            commission_rate: default_commission_rate(),
            data_dir: default_data_dir(),
            scheduler_backend: SchedulerBackendKind::default(),
            worker_pool_size: default_worker_pool_size(),
            default_max_instances: default_max_instances(),
            default_misfire_grace_s: default_misfire_grace_s(),
            error_budget_failures: default_error_budget_failures(),
            error_budget_window_s: default_error_budget_window_s(),
            symbol_cache_ttl_s: default_symbol_cache_ttl_s(),
            exchange_timeout_s: default_exchange_timeout_s(),
            collector_candles_per_fetch: default_collector_k(),
            candle_retention_days: default_candle_retention_days(),
            indicator_retention_days: default_indicator_retention_days(),
            signal_retention_days: default_signal_retention_days(),
            job_log_retention_days: default_job_log_retention_days(),
            news_retention_days: default_news_retention_days(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`, falling back to
    /// defaults (with a log line) when the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "no runtime config found, starting from defaults");
                Self::default()
            }
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        info!(path = %path.display(), trading_mode = %config.trading_mode, "runtime config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise runtime config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

/// Atomically write `value` as pretty JSON to `path` (tmp + rename),
/// generalizing [`RuntimeConfig::save`] for any table-shaped document.
pub fn atomic_write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(value).context("failed to serialise document")?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp document to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp document to {}", path.display()))?;
    Ok(())
}

/// Read a table-shaped JSON document from `path`, returning `default` if the
/// file does not yet exist.
pub fn read_json_or_default<T: for<'de> Deserialize<'de> + Default>(path: impl AsRef<Path>) -> T {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse document, using default");
            T::default()
        }),
        Err(_) => T::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.symbols[0], "BTCUSDT");
        assert_eq!(cfg.scheduler_backend, SchedulerBackendKind::InProcess);
        assert_eq!(cfg.worker_pool_size, 20);
        assert_eq!(cfg.default_max_instances, 3);
        assert_eq!(cfg.default_misfire_grace_s, 60);
        assert_eq!(cfg.error_budget_failures, 5);
        assert_eq!(cfg.error_budget_window_s, 600);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.commission_rate, 0.001);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "symbols": ["ETHUSDT"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.default_max_instances, 3);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.worker_pool_size, cfg2.worker_pool_size);
    }

    #[test]
    fn atomic_write_then_read_roundtrips() {
        let dir = std::env::temp_dir().join(format!("aurora-core-test-{}", std::process::id()));
        let path = dir.join("table.json");
        let value = vec![1, 2, 3];
        atomic_write_json(&path, &value).unwrap();
        let read_back: Vec<i32> = read_json_or_default(&path);
        assert_eq!(read_back, value);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
