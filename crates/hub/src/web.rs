use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::actuation::PumpStatus;
use crate::db::now_timestamp;
use crate::engine::StartOutcome;
use crate::error::{HubError, HubResult};
use crate::hardware::HardwarePayload;
use crate::report::{self, MetricsRange, ReportRange};
use crate::settings::{self, SettingsUpdate};
use crate::state::SharedState;

const DEFAULT_RECENT_LIMIT: i64 = 50;
const DEFAULT_NOTIFICATION_LIMIT: i64 = 10;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        // simulation engine
        .route("/api/simulation/start", post(simulation_start))
        .route("/api/simulation/stop", post(simulation_stop))
        .route("/api/simulation/data", get(simulation_data))
        .route("/api/simulation/status", get(simulation_status))
        .route("/api/mode", get(get_mode).post(set_mode))
        // hardware path + manual pump control
        .route("/api/hardware/read", post(hardware_read))
        .route("/api/hardware/status", get(hardware_status))
        .route("/api/hardware/pump", post(hardware_pump))
        .route("/api/pump/on", post(pump_on))
        .route("/api/pump/off", post(pump_off))
        // history
        .route("/api/data/all", get(data_all))
        .route("/api/data/recent", get(data_recent))
        .route("/api/sensors/latest", get(sensors_latest))
        .route("/api/water/log", post(water_log))
        .route("/api/water/usage", get(water_usage))
        // dashboard
        .route("/api/status", get(api_status))
        .route("/api/system/summary", get(system_summary))
        .route("/api/notifications", get(notifications))
        .route("/api/settings", get(get_settings).post(post_settings))
        .route("/api/reports", get(reports))
        .route("/api/metrics/water", get(metrics_water))
        .route("/api/metrics/sensors", get(metrics_sensors))
        .route("/api/metrics/summary", get(metrics_summary))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::InvalidArgument(_) | HubError::Conflict(_) => StatusCode::BAD_REQUEST,
            HubError::Dataset(_) | HubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Lenient JSON body: anything unparsable reads as `null`.
fn json_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

#[derive(Debug, Default, Deserialize)]
struct LimitQuery {
    limit: Option<String>,
}

impl LimitQuery {
    fn limit_or(&self, default: i64) -> i64 {
        self.limit
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RangeQuery {
    range: Option<String>,
    export: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers: simulation + mode
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "Smart Irrigation backend is running!" }))
}

async fn simulation_start(State(state): State<SharedState>) -> HubResult<Json<Value>> {
    let body = match state.engine.start().await? {
        StartOutcome::Started { total_rows } => {
            json!({ "status": "started", "total_rows": total_rows })
        }
        StartOutcome::AlreadyRunning => json!({ "status": "already_running" }),
    };
    Ok(Json(body))
}

async fn simulation_stop(State(state): State<SharedState>) -> Json<Value> {
    state.engine.stop().await;
    Json(json!({ "status": "stopped" }))
}

async fn simulation_data(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.simulation_view().await)
}

async fn simulation_status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.engine.snapshot().await)
}

async fn get_mode(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "mode": state.modes.get() }))
}

async fn set_mode(State(state): State<SharedState>, body: Bytes) -> HubResult<Json<Value>> {
    let raw = json_body(&body)
        .get("mode")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let mode = state.modes.set_from_str(&raw).await?;
    Ok(Json(json!({ "mode": mode })))
}

// ---------------------------------------------------------------------------
// Handlers: hardware + pump
// ---------------------------------------------------------------------------

async fn hardware_read(State(state): State<SharedState>, body: Bytes) -> HubResult<Json<Value>> {
    let payload = HardwarePayload::from_json(&body)?;
    let snap = state.hardware.ingest(payload).await;
    Ok(Json(json!({ "status": "received", "data": snap })))
}

async fn hardware_status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.hardware.snapshot().await)
}

async fn hardware_pump(State(state): State<SharedState>, body: Bytes) -> HubResult<Json<Value>> {
    let action = json_body(&body)
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .parse::<PumpStatus>()?;
    state.set_pump(action).await;
    Ok(Json(json!({ "status": format!("Pump {action}") })))
}

async fn pump_on(State(state): State<SharedState>) -> Json<Value> {
    state.set_pump(PumpStatus::On).await;
    Json(json!({ "status": "Pump turned ON" }))
}

async fn pump_off(State(state): State<SharedState>) -> Json<Value> {
    state.set_pump(PumpStatus::Off).await;
    Json(json!({ "status": "Pump turned OFF" }))
}

// ---------------------------------------------------------------------------
// Handlers: history
// ---------------------------------------------------------------------------

async fn data_all(State(state): State<SharedState>) -> HubResult<impl IntoResponse> {
    Ok(Json(state.db.fetch_readings(None).await?))
}

async fn data_recent(
    State(state): State<SharedState>,
    Query(q): Query<LimitQuery>,
) -> HubResult<impl IntoResponse> {
    let limit = q.limit_or(DEFAULT_RECENT_LIMIT).max(0);
    Ok(Json(state.db.fetch_readings(Some(limit)).await?))
}

async fn sensors_latest(State(state): State<SharedState>) -> HubResult<Json<Value>> {
    let body = match state.db.latest_reading().await? {
        Some(rec) => serde_json::to_value(rec.reading).map_err(anyhow::Error::from)?,
        None => json!({}),
    };
    Ok(Json(body))
}

async fn water_log(State(state): State<SharedState>, body: Bytes) -> HubResult<Json<Value>> {
    let body = json_body(&body);
    let liters = body
        .get("liters_used")
        .and_then(Value::as_f64)
        .filter(|l| l.is_finite())
        .ok_or_else(|| HubError::InvalidArgument("liters_used must be a number".to_string()))?;
    let timestamp = body
        .get("timestamp")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(now_timestamp);

    state.db.log_water_usage(&timestamp, liters).await?;
    Ok(Json(json!({ "status": "logged" })))
}

async fn water_usage(State(state): State<SharedState>) -> HubResult<impl IntoResponse> {
    let usage = state.db.fetch_water_usage().await?;
    Ok((
        [
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(usage),
    ))
}

// ---------------------------------------------------------------------------
// Handlers: dashboard
// ---------------------------------------------------------------------------

async fn api_status(State(state): State<SharedState>) -> HubResult<impl IntoResponse> {
    Ok(Json(state.status().await?))
}

async fn system_summary(State(state): State<SharedState>) -> HubResult<impl IntoResponse> {
    Ok(Json(state.summary().await?))
}

async fn notifications(
    State(state): State<SharedState>,
    Query(q): Query<LimitQuery>,
) -> HubResult<impl IntoResponse> {
    let limit = q.limit_or(DEFAULT_NOTIFICATION_LIMIT).max(0);
    Ok(Json(state.db.fetch_notifications(limit).await?))
}

async fn get_settings(State(state): State<SharedState>) -> HubResult<impl IntoResponse> {
    Ok(Json(settings::load(&state.db, &state.settings).await?))
}

async fn post_settings(State(state): State<SharedState>, body: Bytes) -> HubResult<Json<Value>> {
    let update: SettingsUpdate = serde_json::from_value(json_body(&body)).unwrap_or_default();
    settings::apply(&state.db, &update).await?;
    Ok(Json(json!({ "status": "saved" })))
}

async fn reports(
    State(state): State<SharedState>,
    Query(q): Query<RangeQuery>,
) -> HubResult<Response> {
    let rows = report::build_report(&state.db, ReportRange::parse(q.range.as_deref())).await?;
    match q.export.as_deref() {
        Some("csv") => {
            let csv = report::to_csv(&rows)?;
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv"),
                    (header::CONTENT_DISPOSITION, "attachment; filename=report.csv"),
                ],
                csv,
            )
                .into_response())
        }
        Some(other) if !other.is_empty() => Err(HubError::InvalidArgument(format!(
            "unsupported export format '{other}' (use csv)"
        ))),
        _ => Ok(Json(rows).into_response()),
    }
}

async fn metrics_water(
    State(state): State<SharedState>,
    Query(q): Query<RangeQuery>,
) -> HubResult<impl IntoResponse> {
    let range = MetricsRange::parse(q.range.as_deref());
    Ok(Json(report::water_metrics(&state.db, range).await?))
}

async fn metrics_sensors(
    State(state): State<SharedState>,
    Query(q): Query<RangeQuery>,
) -> HubResult<impl IntoResponse> {
    let range = MetricsRange::parse(q.range.as_deref());
    Ok(Json(report::sensor_metrics(&state.db, range).await?))
}

async fn metrics_summary(
    State(state): State<SharedState>,
    Query(q): Query<RangeQuery>,
) -> HubResult<impl IntoResponse> {
    let range = MetricsRange::parse(q.range.as_deref());
    Ok(Json(report::summary_metrics(&state.db, range).await?))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: SharedState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ===========================================================================
// Tests
// ===========================================================================
