//! HTTP surface of the agent process.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Host, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::info;

use tablevoice_agent_core::ToolDispatcher;
use tablevoice_api_core::ApiClient;

use crate::config::ServerConfig;
use crate::engine;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub api: ApiClient,
    pub dispatcher: ToolDispatcher,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let api = ApiClient::new(config.api_base_url.clone());
        let dispatcher = ToolDispatcher::new(api.clone());
        Self { config, api, dispatcher }
    }
}

/// Build the router: health, the provider webhook, and the media stream.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/incoming-call", get(incoming_call).post(incoming_call))
        .route("/media-stream", get(media_stream))
        .with_state(state)
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "service": "tablevoice-server"}))
}

/// Provider voice webhook: answer with TwiML that connects the call's
/// media to our WebSocket endpoint.
async fn incoming_call(Host(host): Host) -> Response {
    info!(host, "incoming call webhook");
    let twiml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response>\
           <Connect>\
             <Stream url=\"wss://{host}/media-stream\" />\
           </Connect>\
         </Response>"
    );
    ([(header::CONTENT_TYPE, "application/xml")], twiml).into_response()
}

/// Media-stream WebSocket: one engine task per connection.
async fn media_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| {
        engine::run_call(socket, state.config, state.api, state.dispatcher)
    })
}
