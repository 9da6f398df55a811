// =============================================================================
// Binance exchange adapter — HMAC-SHA256 signed REST client
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. All signed
// requests include X-MBX-APIKEY as a header and a recvWindow of 5000 ms to
// tolerate minor clock drift between this service and Binance's servers.
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::error::{classify_reqwest_error, CoreError, CoreResult};
use crate::exchange::rate_limit::RateLimitTracker;
use crate::exchange::{ExchangeAdapter, ExchangeBalance, ExchangeTrade, OrderAck, SymbolInfo, Ticker};
use crate::store::Candle;
use crate::types::{OrderSide, OrderType, Timeframe};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;
const KLINE_WEIGHT: u32 = 2;
const ORDER_WEIGHT: u32 = 1;

pub struct BinanceAdapter {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl BinanceAdapter {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, timeout_s: u64) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(timeout_s))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key,
            secret,
            base_url: "https://api.binance.com".to_string(),
            client,
            rate_limit: Arc::new(RateLimitTracker::new()),
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    fn check_budget(&self, weight: u32) -> CoreResult<()> {
        if !self.rate_limit.can_send_request(weight) {
            return Err(CoreError::Transient("client-side rate-limit budget exhausted".into()));
        }
        Ok(())
    }

    fn parse_str_decimal(val: &serde_json::Value) -> CoreResult<Decimal> {
        let s = val
            .as_str()
            .map(|s| s.to_string())
            .or_else(|| val.as_f64().map(|n| n.to_string()))
            .ok_or_else(|| CoreError::Internal(format!("expected string or number, got: {val}")))?;
        Decimal::from_str(&s).map_err(|e| CoreError::Internal(format!("failed to parse '{s}' as decimal: {e}")))
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    #[instrument(skip(self), name = "exchange::fetch_klines")]
    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe, limit: u32) -> CoreResult<Vec<Candle>> {
        self.check_budget(KLINE_WEIGHT)?;
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            timeframe.as_str(),
            limit
        );
        let resp = self.client.get(&url).send().await.map_err(|e| classify_reqwest_error(&e))?;
        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            return Err(CoreError::BadRequest(format!("klines returned {status}: {body}")));
        }
        let raw = body
            .as_array()
            .ok_or_else(|| CoreError::Internal("klines response is not an array".into()))?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry
                .as_array()
                .ok_or_else(|| CoreError::Internal("kline entry is not an array".into()))?;
            if arr.len() < 11 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }
            let ts_open = arr[0].as_i64().unwrap_or(0);
            candles.push(Candle {
                symbol: symbol.to_string(),
                timeframe,
                ts_open,
                open: Self::parse_str_decimal(&arr[1])?,
                high: Self::parse_str_decimal(&arr[2])?,
                low: Self::parse_str_decimal(&arr[3])?,
                close: Self::parse_str_decimal(&arr[4])?,
                volume: Self::parse_str_decimal(&arr[5])?,
                quote_volume: Self::parse_str_decimal(&arr[7])?,
                trades: arr[8].as_u64().unwrap_or(0),
                taker_buy_volume: Self::parse_str_decimal(&arr[9])?,
                taker_buy_quote_volume: Self::parse_str_decimal(&arr[10])?,
            });
        }
        debug!(symbol, timeframe = timeframe.as_str(), count = candles.len(), "klines fetched");
        Ok(candles)
    }

    #[instrument(skip(self), name = "exchange::fetch_ticker")]
    async fn fetch_ticker(&self, symbol: &str) -> CoreResult<Ticker> {
        self.check_budget(KLINE_WEIGHT)?;
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, symbol);
        let resp = self.client.get(&url).send().await.map_err(|e| classify_reqwest_error(&e))?;
        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            return Err(CoreError::BadRequest(format!("ticker returned {status}: {body}")));
        }
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: Self::parse_str_decimal(&body["lastPrice"])?,
            volume_24h: Self::parse_str_decimal(&body["volume"])?,
            quote_volume_24h: Self::parse_str_decimal(&body["quoteVolume"])?,
            price_change_pct_24h: body["priceChangePercent"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
        })
    }

    #[instrument(skip(self), name = "exchange::fetch_exchange_info")]
    async fn fetch_exchange_info(&self) -> CoreResult<Vec<SymbolInfo>> {
        self.check_budget(10)?;
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(|e| classify_reqwest_error(&e))?;
        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            return Err(CoreError::BadRequest(format!("exchangeInfo returned {status}: {body}")));
        }
        let symbols = body["symbols"]
            .as_array()
            .ok_or_else(|| CoreError::Internal("exchangeInfo missing 'symbols'".into()))?;
        Ok(symbols
            .iter()
            .filter_map(|s| {
                Some(SymbolInfo {
                    symbol: s["symbol"].as_str()?.to_string(),
                    base: s["baseAsset"].as_str()?.to_string(),
                    quote: s["quoteAsset"].as_str()?.to_string(),
                    status: s["status"].as_str().unwrap_or("UNKNOWN").to_string(),
                    flags: s["permissions"]
                        .as_array()
                        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                        .unwrap_or_default(),
                })
            })
            .collect())
    }

    #[instrument(skip(self), name = "exchange::fetch_24h_tickers")]
    async fn fetch_24h_tickers(&self) -> CoreResult<Vec<Ticker>> {
        self.check_budget(40)?;
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(|e| classify_reqwest_error(&e))?;
        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            return Err(CoreError::Transient(format!("24hr tickers returned {status}")));
        }
        let arr = body.as_array().ok_or_else(|| CoreError::Internal("24hr response is not an array".into()))?;
        Ok(arr
            .iter()
            .filter_map(|t| {
                Some(Ticker {
                    symbol: t["symbol"].as_str()?.to_string(),
                    last_price: Self::parse_str_decimal(&t["lastPrice"]).ok()?,
                    volume_24h: Self::parse_str_decimal(&t["volume"]).ok()?,
                    quote_volume_24h: Self::parse_str_decimal(&t["quoteVolume"]).ok()?,
                    price_change_pct_24h: t["priceChangePercent"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
                })
            })
            .collect())
    }

    #[instrument(skip(self, price), name = "exchange::create_order")]
    async fn create_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        qty: Decimal,
        price: Option<Decimal>,
    ) -> CoreResult<OrderAck> {
        if self.api_key.is_empty() {
            return Err(CoreError::Unauthorized("no API credentials configured for live trading".into()));
        }
        if !self.rate_limit.can_place_order() {
            return Err(CoreError::Transient("order rate-limit budget exhausted".into()));
        }
        self.check_budget(ORDER_WEIGHT)?;

        let mut params = format!("symbol={symbol}&side={side}&type={order_type}&quantity={qty}");
        if order_type == OrderType::Limit {
            let p = price.ok_or_else(|| CoreError::BadRequest("limit order requires a price".into()))?;
            params.push_str(&format!("&price={p}&timeInForce=GTC"));
        }

        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);
        let resp = self.client.post(&url).send().await.map_err(|e| classify_reqwest_error(&e))?;
        self.rate_limit.update_from_headers(resp.headers());
        self.rate_limit.record_order_sent();
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            return Err(CoreError::VenueReject(format!("order rejected {status}: {body}")));
        }

        Ok(OrderAck {
            order_id: body["orderId"].to_string(),
            status: body["status"].as_str().unwrap_or("UNKNOWN").to_string(),
            fill_qty: Self::parse_str_decimal(&body["executedQty"]).unwrap_or_default(),
            avg_price: Self::parse_str_decimal(&body["price"]).unwrap_or_default(),
            ts: body["transactTime"].as_i64().unwrap_or_else(|| Self::timestamp_ms() as i64),
        })
    }

    #[instrument(skip(self), name = "exchange::cancel_order")]
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> CoreResult<()> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);
        let resp = self.client.delete(&url).send().await.map_err(|e| classify_reqwest_error(&e))?;
        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            return Err(CoreError::BadRequest(format!("cancel returned {status}: {body}")));
        }
        Ok(())
    }

    #[instrument(skip(self), name = "exchange::get_balances")]
    async fn get_balances(&self) -> CoreResult<Vec<ExchangeBalance>> {
        let qs = self.signed_query("");
        let url = format!("{}/api/v3/account?{}", self.base_url, qs);
        let resp = self.client.get(&url).send().await.map_err(|e| classify_reqwest_error(&e))?;
        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            return Err(CoreError::Unauthorized(format!("account returned {status}: {body}")));
        }
        let balances = body["balances"]
            .as_array()
            .ok_or_else(|| CoreError::Internal("account response missing 'balances'".into()))?;
        Ok(balances
            .iter()
            .filter_map(|b| {
                Some(ExchangeBalance {
                    asset: b["asset"].as_str()?.to_string(),
                    free: Self::parse_str_decimal(&b["free"]).ok()?,
                    locked: Self::parse_str_decimal(&b["locked"]).ok()?,
                })
            })
            .collect())
    }

    #[instrument(skip(self), name = "exchange::get_trades")]
    async fn get_trades(&self, symbol: &str, limit: u32) -> CoreResult<Vec<ExchangeTrade>> {
        let params = format!("symbol={symbol}&limit={limit}");
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/myTrades?{}", self.base_url, qs);
        let resp = self.client.get(&url).send().await.map_err(|e| classify_reqwest_error(&e))?;
        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            return Err(CoreError::BadRequest(format!("myTrades returned {status}: {body}")));
        }
        let arr = body.as_array().ok_or_else(|| CoreError::Internal("myTrades response is not an array".into()))?;
        Ok(arr
            .iter()
            .filter_map(|t| {
                Some(ExchangeTrade {
                    order_id: t["orderId"].to_string(),
                    symbol: symbol.to_string(),
                    side: if t["isBuyer"].as_bool().unwrap_or(true) { OrderSide::Buy } else { OrderSide::Sell },
                    qty: Self::parse_str_decimal(&t["qty"]).ok()?,
                    price: Self::parse_str_decimal(&t["price"]).ok()?,
                    fee: Self::parse_str_decimal(&t["commission"]).ok()?,
                    ts: t["time"].as_i64().unwrap_or(0),
                })
            })
            .collect())
    }
}

impl std::fmt::Debug for BinanceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceAdapter")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_same_input() {
        let adapter = BinanceAdapter::new("key", "secret", 10);
        let sig1 = adapter.sign("timestamp=1&recvWindow=5000");
        let sig2 = adapter.sign("timestamp=1&recvWindow=5000");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
    }

    #[test]
    fn signed_query_appends_timestamp_and_signature() {
        let adapter = BinanceAdapter::new("key", "secret", 10);
        let qs = adapter.signed_query("symbol=BTCUSDT");
        assert!(qs.contains("symbol=BTCUSDT"));
        assert!(qs.contains("timestamp="));
        assert!(qs.contains("recvWindow=5000"));
        assert!(qs.contains("signature="));
    }

    #[test]
    fn debug_impl_redacts_credentials() {
        let adapter = BinanceAdapter::new("super-secret-key", "super-secret-value", 10);
        let debug_str = format!("{adapter:?}");
        assert!(!debug_str.contains("super-secret-key"));
        assert!(!debug_str.contains("super-secret-value"));
    }
}
