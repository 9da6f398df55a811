// =============================================================================
// REST admin surface — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Only `health` and the realtime socket
// upgrade require no authentication; every other route is gated by the
// `AuthBearer` extractor. CORS is configured permissively, same as it has
// always been here — tighten `allow_origin` at the edge in production.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::error::{CoreError, CoreResult};
use crate::scheduler::{JobState, ScheduledJob};
use crate::store::Order;
use crate::strategy::StrategyExecution;
use crate::types::{OrderType, Timeframe, TradingCore};

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Symbols (C3) ────────────────────────────────────────────
        .route("/api/v1/symbols", get(list_symbols))
        .route("/api/v1/symbols/refresh", post(refresh_symbols))
        .route("/api/v1/symbols/:symbol", get(get_symbol))
        // ── Time-series store (C1) ──────────────────────────────────
        .route("/api/v1/candles/:symbol/:timeframe", get(list_candles))
        .route("/api/v1/indicators/:symbol/:timeframe/:name", get(list_indicator))
        // ── Data collection (C5) ────────────────────────────────────
        .route("/api/v1/collectors", get(list_collectors).post(create_collector))
        .route("/api/v1/collectors/:id", get(get_collector).delete(remove_collector))
        .route("/api/v1/collectors/:id/start", post(start_collector))
        .route("/api/v1/collectors/:id/stop", post(stop_collector))
        // ── Scheduler / job executor / execution log (C6, C7, C11) ──
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/jobs/:id", get(get_job).delete(remove_job))
        .route("/api/v1/jobs/:id/trigger", post(trigger_job))
        .route("/api/v1/jobs/:id/pause", post(pause_job))
        .route("/api/v1/jobs/:id/resume", post(resume_job))
        .route("/api/v1/jobs/logs", get(execution_logs))
        .route("/api/v1/jobs/stats", get(execution_stats))
        // ── Strategies (C8) ──────────────────────────────────────────
        .route("/api/v1/strategies", get(list_strategies).post(create_strategy))
        .route("/api/v1/strategies/:id", get(get_strategy))
        .route("/api/v1/strategies/:id/start", post(start_strategy))
        .route("/api/v1/strategies/:id/pause", post(pause_strategy))
        .route("/api/v1/strategies/:id/resume", post(resume_strategy))
        .route("/api/v1/strategies/:id/stop", post(stop_strategy))
        .route("/api/v1/strategies/:id/signals", get(strategy_signals))
        // ── Trading (C9, C10) ────────────────────────────────────────
        .route("/api/v1/portfolios", post(create_portfolio))
        .route("/api/v1/portfolios/:id", get(get_portfolio))
        .route("/api/v1/portfolios/:id/positions", get(list_positions))
        .route("/api/v1/portfolios/:id/balance", get(get_balance))
        .route("/api/v1/portfolios/:id/trades", get(trade_history))
        .route("/api/v1/portfolios/:id/buy", post(buy))
        .route("/api/v1/portfolios/:id/sell", post(sell))
        .route("/api/v1/portfolios/:id/close", post(close_position))
        .route("/api/v1/portfolios/:id/stop-loss", post(set_stop_loss))
        .route("/api/v1/portfolios/:id/take-profit", post(set_take_profit))
        .route("/api/v1/portfolios/:id/mark-to-market", post(mark_to_market))
        // ── Realtime upgrade (handled in the ws module, mounted here) ─
        .route("/api/v1/ws/:topic", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok", server_time: chrono::Utc::now().timestamp_millis() })
}

// =============================================================================
// Symbols (C3)
// =============================================================================

async fn list_symbols(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, CoreError> {
    Ok(Json(state.symbols.all().await?))
}

async fn get_symbol(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(symbol): Path<String>) -> Result<impl IntoResponse, CoreError> {
    Ok(Json(state.symbols.info(&symbol).await?))
}

async fn refresh_symbols(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, CoreError> {
    let count = state.symbols.refresh().await?;
    Ok(Json(serde_json::json!({ "refreshed": count })))
}

// =============================================================================
// Time-series store (C1)
// =============================================================================

#[derive(Deserialize)]
struct CandleQuery {
    from: Option<i64>,
    to: Option<i64>,
    limit: Option<usize>,
    #[serde(default)]
    ascending: bool,
}

fn parse_timeframe(raw: &str) -> CoreResult<Timeframe> {
    Timeframe::parse(raw).ok_or_else(|| CoreError::BadRequest(format!("unknown timeframe '{raw}'")))
}

async fn list_candles(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((symbol, timeframe)): Path<(String, String)>,
    Query(q): Query<CandleQuery>,
) -> Result<impl IntoResponse, CoreError> {
    let timeframe = parse_timeframe(&timeframe)?;
    let order = if q.ascending { Order::Ascending } else { Order::Descending };
    let candles = state.candles.range_candles(&symbol, timeframe, q.from, q.to, q.limit.or(Some(500)), order);
    Ok(Json(candles))
}

async fn list_indicator(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path((symbol, timeframe, name)): Path<(String, String, String)>,
    Query(q): Query<CandleQuery>,
) -> Result<impl IntoResponse, CoreError> {
    let timeframe = parse_timeframe(&timeframe)?;
    let order = if q.ascending { Order::Ascending } else { Order::Descending };
    let mut samples = state.indicators.range(&symbol, timeframe, &name, q.from, q.to, order);
    samples.truncate(q.limit.unwrap_or(500));
    Ok(Json(samples))
}

// =============================================================================
// Data collection (C5)
// =============================================================================

#[derive(Deserialize)]
struct CreateCollectorRequest {
    symbol: String,
    exchange: String,
    timeframes: Vec<String>,
    interval_s: u64,
}

async fn list_collectors(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.data_collection.list())
}

async fn create_collector(_auth: AuthBearer, State(state): State<Arc<AppState>>, Json(req): Json<CreateCollectorRequest>) -> Result<impl IntoResponse, CoreError> {
    let timeframes: Vec<Timeframe> = req
        .timeframes
        .iter()
        .map(|t| parse_timeframe(t))
        .collect::<CoreResult<Vec<_>>>()?;
    let config = state.data_collection.create(req.symbol, req.exchange, timeframes, req.interval_s);
    Ok(Json(config))
}

async fn get_collector(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, CoreError> {
    Ok(Json(state.data_collection.get(id)?))
}

async fn start_collector(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, CoreError> {
    let now = chrono::Utc::now().timestamp_millis();
    Ok(Json(state.data_collection.start(&state.scheduler, id, now)?))
}

async fn stop_collector(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, CoreError> {
    Ok(Json(state.data_collection.stop(&state.scheduler, id)?))
}

async fn remove_collector(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    Json(state.data_collection.remove(&state.scheduler, id))
}

// =============================================================================
// Scheduler / job executor / execution log (C6, C7, C11)
// =============================================================================

#[derive(Deserialize)]
struct JobFilter {
    state: Option<String>,
}

#[derive(Serialize)]
struct JobSummary {
    id: String,
    handler_name: String,
    state: JobState,
    next_fire_at: i64,
    consecutive_failures: u32,
}

impl From<ScheduledJob> for JobSummary {
    fn from(j: ScheduledJob) -> Self {
        Self { id: j.id, handler_name: j.handler_name, state: j.state, next_fire_at: j.next_fire_at, consecutive_failures: j.consecutive_failures }
    }
}

async fn list_jobs(_auth: AuthBearer, State(state): State<Arc<AppState>>, Query(filter): Query<JobFilter>) -> impl IntoResponse {
    let mut jobs = state.scheduler.list_jobs();
    if let Some(want) = filter.state.as_deref() {
        jobs.retain(|j| format!("{:?}", j.state).eq_ignore_ascii_case(want));
    }
    Json(jobs.into_iter().map(JobSummary::from).collect::<Vec<_>>())
}

async fn get_job(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<impl IntoResponse, CoreError> {
    state.scheduler.get_job(&id).map(Json).ok_or_else(|| CoreError::NotFound(format!("job {id} not found")))
}

async fn trigger_job(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<impl IntoResponse, CoreError> {
    let outcome = state.scheduler.trigger_now(&id).await?;
    Ok(Json(outcome))
}

async fn pause_job(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    state.scheduler.pause_job(&id);
    Json(serde_json::json!({ "id": id, "paused": true }))
}

async fn resume_job(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    state.scheduler.resume_job(&id);
    Json(serde_json::json!({ "id": id, "resumed": true }))
}

async fn remove_job(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    Json(state.scheduler.remove_job(&id))
}

#[derive(Deserialize)]
struct LogFilter {
    job_name: Option<String>,
    limit: Option<usize>,
}

async fn execution_logs(_auth: AuthBearer, State(state): State<Arc<AppState>>, Query(filter): Query<LogFilter>) -> impl IntoResponse {
    Json(state.logs.recent(filter.job_name.as_deref(), filter.limit.unwrap_or(100)))
}

#[derive(Deserialize)]
struct StatsFilter {
    job_name: Option<String>,
    window: Option<usize>,
}

async fn execution_stats(_auth: AuthBearer, State(state): State<Arc<AppState>>, Query(filter): Query<StatsFilter>) -> impl IntoResponse {
    Json(state.logs.stats(filter.job_name.as_deref(), filter.window.unwrap_or(100)))
}

// =============================================================================
// Strategies (C8)
// =============================================================================

#[derive(Deserialize)]
struct CreateStrategyRequest {
    owner: String,
    handler_name: String,
    #[serde(default)]
    parameters: serde_json::Value,
    symbol: String,
    timeframe: String,
    initial_balance: Decimal,
    commission_rate: Decimal,
    execution: StrategyExecution,
    max_position_size_pct: f64,
}

async fn list_strategies(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.strategies.list())
}

async fn create_strategy(_auth: AuthBearer, State(state): State<Arc<AppState>>, Json(req): Json<CreateStrategyRequest>) -> Result<impl IntoResponse, CoreError> {
    let timeframe = parse_timeframe(&req.timeframe)?;
    let now = chrono::Utc::now().timestamp_millis();
    let strategy = state.strategies.create_strategy(
        req.owner,
        req.handler_name,
        req.parameters,
        req.symbol,
        timeframe,
        req.initial_balance,
        req.commission_rate,
        req.execution,
        req.max_position_size_pct,
        now,
    )?;
    Ok(Json(strategy))
}

async fn get_strategy(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, CoreError> {
    Ok(Json(state.strategies.get(id)?))
}

async fn start_strategy(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, CoreError> {
    let now = chrono::Utc::now().timestamp_millis();
    Ok(Json(state.strategies.start(&state.scheduler, id, now)?))
}

async fn pause_strategy(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, CoreError> {
    let now = chrono::Utc::now().timestamp_millis();
    Ok(Json(state.strategies.pause(id, now)?))
}

async fn resume_strategy(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, CoreError> {
    let now = chrono::Utc::now().timestamp_millis();
    Ok(Json(state.strategies.resume(id, now)?))
}

async fn stop_strategy(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, CoreError> {
    let now = chrono::Utc::now().timestamp_millis();
    Ok(Json(state.strategies.stop(&state.scheduler, id, now)?))
}

#[derive(Deserialize)]
struct SignalFilter {
    limit: Option<usize>,
}

async fn strategy_signals(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Query(filter): Query<SignalFilter>) -> impl IntoResponse {
    Json(state.signals.recent(Some(&id.to_string()), filter.limit.unwrap_or(100)))
}

// =============================================================================
// Trading (C9, C10)
// =============================================================================

#[derive(Deserialize)]
struct CreatePortfolioRequest {
    owner: String,
    initial_capital: Decimal,
}

async fn create_portfolio(_auth: AuthBearer, State(state): State<Arc<AppState>>, Json(req): Json<CreatePortfolioRequest>) -> impl IntoResponse {
    Json(state.paper.create_portfolio(req.owner, req.initial_capital))
}

async fn get_portfolio(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, CoreError> {
    Ok(Json(state.paper.get_portfolio(id)?))
}

async fn list_positions(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    Json(state.paper.list_positions(id))
}

#[derive(Deserialize)]
struct BalanceQuery {
    asset: Option<String>,
}

async fn get_balance(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Query(q): Query<BalanceQuery>) -> impl IntoResponse {
    let asset = q.asset.unwrap_or_else(|| "USDT".to_string());
    Json(state.paper.get_balance(id, &asset))
}

#[derive(Deserialize)]
struct TradeHistoryQuery {
    limit: Option<usize>,
}

async fn trade_history(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Query(q): Query<TradeHistoryQuery>) -> impl IntoResponse {
    let mut trades = state.paper.list_trades(id);
    trades.sort_by(|a, b| b.ts.cmp(&a.ts));
    trades.truncate(q.limit.unwrap_or(200));
    Json(trades)
}

#[derive(Deserialize)]
struct OrderRequest {
    symbol: String,
    quantity: Decimal,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    order_type: Option<OrderType>,
    #[serde(default)]
    core: Option<TradingCore>,
}

async fn buy(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(req): Json<OrderRequest>) -> Result<impl IntoResponse, CoreError> {
    let core = req.core.unwrap_or(TradingCore::Paper);
    let order_type = req.order_type.unwrap_or(OrderType::Market);
    let result = state.router.buy(core, id, &req.symbol, req.quantity, req.price, order_type).await?;
    info!(portfolio_id = %id, symbol = %req.symbol, "buy routed");
    Ok(Json(route_result_json(result)))
}

async fn sell(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(req): Json<OrderRequest>) -> Result<impl IntoResponse, CoreError> {
    let core = req.core.unwrap_or(TradingCore::Paper);
    let order_type = req.order_type.unwrap_or(OrderType::Market);
    let result = state.router.sell(core, id, &req.symbol, req.quantity, req.price, order_type).await?;
    info!(portfolio_id = %id, symbol = %req.symbol, "sell routed");
    Ok(Json(route_result_json(result)))
}

#[derive(Deserialize)]
struct ClosePositionRequest {
    symbol: String,
    #[serde(default)]
    core: Option<TradingCore>,
}

async fn close_position(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(req): Json<ClosePositionRequest>) -> Result<impl IntoResponse, CoreError> {
    let core = req.core.unwrap_or(TradingCore::Paper);
    let result = state.router.close_position(core, id, &req.symbol).await?;
    warn!(portfolio_id = %id, symbol = %req.symbol, "position closed via API");
    Ok(Json(route_result_json(result)))
}

fn route_result_json(result: crate::router::RouteResult) -> serde_json::Value {
    match result {
        crate::router::RouteResult::Paper(trade) => serde_json::json!({ "core": "paper", "trade": trade }),
        crate::router::RouteResult::Live { order_id, avg_price, fill_qty } => {
            serde_json::json!({ "core": "live", "order_id": order_id, "avg_price": avg_price, "fill_qty": fill_qty })
        }
    }
}

#[derive(Deserialize)]
struct PriceLevelRequest {
    symbol: String,
    price: Decimal,
    #[serde(default)]
    core: Option<TradingCore>,
}

async fn set_stop_loss(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(req): Json<PriceLevelRequest>) -> Result<impl IntoResponse, CoreError> {
    let core = req.core.unwrap_or(TradingCore::Paper);
    state.router.set_stop_loss(core, id, &req.symbol, req.price).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn set_take_profit(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Json(req): Json<PriceLevelRequest>) -> Result<impl IntoResponse, CoreError> {
    let core = req.core.unwrap_or(TradingCore::Paper);
    state.router.set_take_profit(core, id, &req.symbol, req.price).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
struct CoreQuery {
    #[serde(default)]
    core: Option<TradingCore>,
}

async fn mark_to_market(_auth: AuthBearer, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, Query(q): Query<CoreQuery>) -> Result<impl IntoResponse, CoreError> {
    let core = q.core.unwrap_or(TradingCore::Paper);
    Ok(Json(state.router.mark(core, id).await?))
}
