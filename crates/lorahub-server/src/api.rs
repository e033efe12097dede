//! HTTP request/response surface: ingest, queries, commands and
//! introspection.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use lorahub_core::protocol::{lenient_i64, now_millis};
use lorahub_core::storage::DEFAULT_READING_LIMIT;
use lorahub_core::{Command, GatewayRecord, HubError, ReadingFilter, StorageError};

use crate::dispatcher::DispatchOutcome;
use crate::registry::ConnectionInfo;
use crate::server::AppState;

/// Window used by the active-node count.
const ACTIVE_NODE_WINDOW_MS: i64 = 5 * 60 * 1000;
const DEFAULT_VOLTAGE_HOURS: u32 = 24;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Hub(#[from] HubError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) | Self::Hub(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoltageParams {
    pub hours: Option<u32>,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": now_millis(),
        "connections": state.registry.len(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

pub async fn ingest_sensor_data(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    if !body.is_object() {
        return Err(ApiError::BadRequest("sensor data must be a JSON object".into()));
    }
    let ingest = state.router.ingest_sensor_data(body);
    Ok(Json(json!({
        "status": "success",
        "message": "Data received",
        "timestamp": now_millis(),
        "stored": ingest.stored,
        "delivered": ingest.delivered,
    })))
}

pub async fn latest_readings(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<Value>> {
    let filter = ReadingFilter::latest(params.limit.unwrap_or(DEFAULT_READING_LIMIT));
    Ok(Json(json!(state.storage.query_readings(&filter)?)))
}

pub async fn node_readings(
    State(state): State<AppState>,
    Path(node_id): Path<i64>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<Value>> {
    let filter = ReadingFilter::for_node(node_id, params.limit.unwrap_or(DEFAULT_READING_LIMIT));
    Ok(Json(json!(state.storage.query_readings(&filter)?)))
}

pub async fn voltage_history(
    State(state): State<AppState>,
    Path(node_id): Path<i64>,
    Query(params): Query<VoltageParams>,
) -> ApiResult<Json<Value>> {
    let hours = params.hours.unwrap_or(DEFAULT_VOLTAGE_HOURS);
    let since = Utc::now()
        .checked_sub_signed(chrono::Duration::hours(i64::from(hours)))
        .ok_or_else(|| ApiError::BadRequest(format!("hours out of range: {hours}")))?;
    let filter = ReadingFilter::voltage_history(node_id, since);
    Ok(Json(json!(state.storage.query_readings(&filter)?)))
}

/// Parse `{nodeId, message}` from an operator request.
pub fn parse_command(body: &Value) -> Result<Command, ApiError> {
    let node_id = body
        .get("nodeId")
        .and_then(lenient_i64)
        .ok_or_else(|| ApiError::BadRequest("nodeId and message are required".into()))?;
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::BadRequest("nodeId and message are required".into()))?;
    Ok(Command {
        node_id,
        message: message.to_owned(),
    })
}

pub async fn send_command(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let command = parse_command(&body)?;
    let response = match state.dispatcher.dispatch(&command)? {
        DispatchOutcome::Delivered { gateways } => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": "Command sent to gateway",
                "gateways_notified": gateways,
            })),
        ),
        DispatchOutcome::Unavailable { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "No gateways connected",
                "message": "Command could not be delivered",
            })),
        ),
    };
    Ok(response.into_response())
}

/// A stored gateway annotated with whether it is connected right now.
#[derive(Debug, Serialize)]
pub struct GatewayStatus {
    #[serde(flatten)]
    pub record: GatewayRecord,
    pub realtime_status: &'static str,
}

pub async fn gateways(State(state): State<AppState>) -> ApiResult<Json<Vec<GatewayStatus>>> {
    let rows = state.storage.list_gateways()?;
    let statuses = rows
        .into_iter()
        .map(|record| {
            let realtime_status = if state.registry.has_gateway(&record.gateway_id) {
                "connected"
            } else {
                "disconnected"
            };
            GatewayStatus {
                record,
                realtime_status,
            }
        })
        .collect();
    Ok(Json(statuses))
}

pub async fn active_nodes(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let count = state
        .storage
        .count_active_nodes(now_millis() - ACTIVE_NODE_WINDOW_MS)?;
    Ok(Json(json!({ "activeNodeCount": count })))
}

pub async fn connections(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    let mut infos: Vec<ConnectionInfo> = state
        .registry
        .snapshot()
        .iter()
        .map(|record| record.info())
        .collect();
    infos.sort_by_key(|info| info.connected_at);
    Json(infos)
}
