// =============================================================================
// Symbol registry (C3)
// =============================================================================
//
// TTL-bounded snapshot cache over the exchange's tradable-symbol list. Refresh
// is triggered on miss/expiry or by a scheduler housekeeping job; everything
// else reads the cached snapshot lock-free from behind a read lock.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::exchange::{ExchangeAdapter, SymbolInfo};

pub struct SymbolRegistry {
    exchange: Arc<dyn ExchangeAdapter>,
    ttl: Duration,
    snapshot: RwLock<Option<(Instant, Vec<SymbolInfo>)>>,
}

impl SymbolRegistry {
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, ttl_s: u64) -> Self {
        Self {
            exchange,
            ttl: Duration::from_secs(ttl_s),
            snapshot: RwLock::new(None),
        }
    }

    /// Force a refresh from the exchange, replacing the cached snapshot.
    pub async fn refresh(&self) -> CoreResult<usize> {
        let symbols = self.exchange.fetch_exchange_info().await?;
        let count = symbols.len();
        *self.snapshot.write() = Some((Instant::now(), symbols));
        info!(count, "symbol registry refreshed");
        Ok(count)
    }

    /// Return the cached snapshot, refreshing first if missing or expired.
    pub async fn all(&self) -> CoreResult<Vec<SymbolInfo>> {
        {
            let snap = self.snapshot.read();
            if let Some((fetched_at, symbols)) = snap.as_ref() {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(symbols.clone());
                }
            }
        }
        debug!("symbol registry cache miss or expired, refreshing");
        self.refresh().await?;
        Ok(self.snapshot.read().as_ref().map(|(_, s)| s.clone()).unwrap_or_default())
    }

    /// Look up a single symbol, refreshing the cache if necessary.
    pub async fn info(&self, symbol: &str) -> CoreResult<SymbolInfo> {
        let all = self.all().await?;
        all.into_iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| CoreError::NotFound(format!("symbol {symbol} not found in registry")))
    }

    /// `Ok(())` if `symbol` is a tradable symbol, otherwise `BadRequest`.
    pub async fn validate(&self, symbol: &str) -> CoreResult<()> {
        match self.info(symbol).await {
            Ok(info) if info.status == "TRADING" => Ok(()),
            Ok(info) => Err(CoreError::BadRequest(format!("symbol {symbol} is not tradable (status {})", info.status))),
            Err(CoreError::NotFound(_)) => Err(CoreError::BadRequest(format!("unknown symbol {symbol}"))),
            Err(e) => Err(e),
        }
    }

    /// The `limit` symbols quoted in `quote` with the highest 24h quote
    /// volume, for strategies that operate over a rotating universe rather
    /// than a fixed symbol list.
    pub async fn popular_by_volume(&self, quote: &str, limit: usize) -> CoreResult<Vec<String>> {
        let mut tickers = self.exchange.fetch_24h_tickers().await?;
        tickers.retain(|t| t.symbol.ends_with(quote));
        tickers.sort_by(|a, b| b.quote_volume_24h.cmp(&a.quote_volume_24h));
        Ok(tickers.into_iter().take(limit).map(|t| t.symbol).collect())
    }

    /// Strategy-bucket helper: apply a named volume floor and quote-asset
    /// filter over the current 24h tickers. Buckets mirror the trading desk's
    /// informal classification — `"scalping"` wants deep, liquid pairs;
    /// `"swing"` tolerates a lower floor for a broader universe.
    pub async fn for_strategy(&self, bucket: &str, quote: &str) -> CoreResult<Vec<String>> {
        let floor = match bucket {
            "scalping" => rust_decimal::Decimal::from(10_000_000u64),
            "swing" => rust_decimal::Decimal::from(1_000_000u64),
            _ => rust_decimal::Decimal::ZERO,
        };
        let mut tickers = self.exchange.fetch_24h_tickers().await?;
        tickers.retain(|t| t.symbol.ends_with(quote) && t.quote_volume_24h >= floor);
        tickers.sort_by(|a, b| b.quote_volume_24h.cmp(&a.quote_volume_24h));
        Ok(tickers.into_iter().map(|t| t.symbol).collect())
    }

    /// Whether the cached snapshot is present and unexpired, without
    /// triggering a refresh. Used by the housekeeping job to decide whether a
    /// proactive refresh is due.
    pub fn is_fresh(&self) -> bool {
        self.snapshot
            .read()
            .as_ref()
            .is_some_and(|(fetched_at, _)| fetched_at.elapsed() < self.ttl)
    }
}
