// =============================================================================
// Core Error Taxonomy
// =============================================================================
//
// Every fallible boundary in the core (exchange calls, store writes, paper
// trading mutations, scheduler dispatch) returns a `CoreError` carrying one
// of a fixed set of kinds. The kind, not the message, drives retry and
// surfacing policy — see `is_retryable`.
// =============================================================================

use thiserror::Error;

/// The fixed taxonomy of failures the core can report.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Network failure, 5xx, or rate-limit exhaustion — retried with bounded
    /// backoff before being surfaced.
    #[error("transient: {0}")]
    Transient(String),

    /// Client-supplied invariant violation (sell more than held, invalid
    /// timeframe, malformed trigger). Never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Credential or token problem.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A non-idempotent conflict (idempotent insert collisions are swallowed
    /// by the caller, not surfaced as this kind).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A live order was rejected by the venue.
    #[error("venue rejected order: {0}")]
    VenueReject(String),

    /// Bug or store failure; logged with full context, counted against the
    /// owning job's error budget, surfaced as a 5xx at the edge.
    #[error("internal error: {0}")]
    Internal(String),

    /// No price is available for a symbol; callers may degrade gracefully
    /// (e.g. skip one symbol's mark-to-market instead of failing the pass).
    #[error("no market data for {0}")]
    NoMarketData(String),

    /// A live-mode operation with no conforming implementation yet.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl CoreError {
    /// Whether this error kind is safe to retry with bounded backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }

    /// Stable machine-readable code for admin API responses.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Transient(_) => "transient",
            CoreError::BadRequest(_) => "bad_request",
            CoreError::Unauthorized(_) => "unauthorized",
            CoreError::NotFound(_) => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::VenueReject(_) => "venue_reject",
            CoreError::Internal(_) => "internal",
            CoreError::NoMarketData(_) => "no_market_data",
            CoreError::NotImplemented(_) => "not_implemented",
        }
    }

    /// HTTP status this error maps to at the admin-API edge.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            CoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::VenueReject(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::NoMarketData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl axum::response::IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (self.status_code(), axum::Json(body)).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Classify a `reqwest` failure into the canonical taxonomy.
pub fn classify_reqwest_error(err: &reqwest::Error) -> CoreError {
    if err.is_timeout() || err.is_connect() {
        return CoreError::Transient(err.to_string());
    }
    if let Some(status) = err.status() {
        if status.as_u16() == 429 || status.is_server_error() {
            return CoreError::Transient(format!("venue returned {status}"));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return CoreError::Unauthorized(format!("venue returned {status}"));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return CoreError::NotFound(format!("venue returned {status}"));
        }
        if status.is_client_error() {
            return CoreError::BadRequest(format!("venue returned {status}"));
        }
    }
    CoreError::Internal(err.to_string())
}

/// Retry an async operation with bounded exponential backoff (base 1 s, cap
/// 30 s, a fixed attempt budget). Only `Transient` failures are retried;
/// anything else is surfaced immediately.
pub async fn retry_transient<F, Fut, T>(attempts: u32, mut op: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CoreResult<T>>,
{
    let mut delay_ms: u64 = 1000;
    let mut last_err = None;
    for attempt in 0..attempts.max(1) {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                tracing::warn!(attempt, error = %e, "transient failure, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(30_000);
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| CoreError::Internal("retry loop exhausted with no error".into())))
}
