//! HTTP control plane: health, call listing, outbound dialing, hangup and
//! transfer. Read paths work on copy-snapshots and never touch audio.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::bridge::{BridgeState, OutboundCall};
use crate::error::BridgeError;

/// Build the control-plane router.
pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/calls", get(list_calls).post(make_call))
        .route("/api/calls/:sid", delete(hangup_call))
        .route("/api/calls/:sid/transfer", post(transfer_call))
        .with_state(state)
}

async fn health(State(state): State<Arc<BridgeState>>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(json!({
        "sip_registered": state.is_registered(),
        "sip_account": config.account_uri(),
        "ws_target": config.ws_target,
        "active_calls": state.live_calls(),
        "max_concurrent_calls": config.max_concurrent_calls,
        "audio": {
            "ec_enabled": !config.no_ec,
            "ec_tail_ms": config.ec_tail_ms,
            "vad_enabled": config.vad,
            "rx_gain": config.rx_gain,
            "tx_gain": config.tx_gain,
        },
    }))
}

async fn list_calls(State(state): State<Arc<BridgeState>>) -> Json<serde_json::Value> {
    Json(json!({"calls": state.snapshot()}))
}

/// Body of `POST /api/calls`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MakeCallRequest {
    to: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    custom_params: Option<HashMap<String, String>>,
    #[serde(default)]
    ws_target: Option<String>,
    #[serde(default)]
    callback_url: Option<String>,
    #[serde(default)]
    timeout_sec: Option<u64>,
}

async fn make_call(
    State(state): State<Arc<BridgeState>>,
    Json(body): Json<MakeCallRequest>,
) -> Response {
    let request = OutboundCall {
        to: body.to,
        from: body.from,
        custom_params: body.custom_params.unwrap_or_default(),
        ws_target: body.ws_target,
        callback_url: body.callback_url,
        timeout_sec: body.timeout_sec,
    };
    match state.make_outbound_call(request).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn hangup_call(
    State(state): State<Arc<BridgeState>>,
    Path(sid): Path<String>,
) -> Response {
    match state.hangup(&sid).await {
        Ok(()) => Json(json!({"sid": sid, "status": "terminating"})).into_response(),
        Err(e) => error_response(e),
    }
}

/// Body of `POST /api/calls/{sid}/transfer`.
#[derive(Debug, Deserialize)]
struct TransferRequest {
    destination: String,
}

async fn transfer_call(
    State(state): State<Arc<BridgeState>>,
    Path(sid): Path<String>,
    Json(body): Json<TransferRequest>,
) -> Response {
    match state.transfer(&sid, &body.destination).await {
        Ok(()) => Json(json!({"sid": sid, "status": "transferred"})).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(error: BridgeError) -> Response {
    let status = match &error {
        BridgeError::OverBudget => StatusCode::TOO_MANY_REQUESTS,
        BridgeError::NotFound { .. } => StatusCode::NOT_FOUND,
        BridgeError::InvalidState { .. } => StatusCode::BAD_REQUEST,
        BridgeError::Sip { .. } => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({"error": error.to_string()}))).into_response()
}
