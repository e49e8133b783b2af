//! HTTP handlers

use std::net::SocketAddr;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use vc_core::{ConsoleTarget, ServerMode};

use crate::bridge::{self, ws};
use crate::state::WebState;

/// Query parameters of the console endpoint
#[derive(Debug, Default, Deserialize)]
pub struct ConsoleQuery {
    pub namespace: Option<String>,
    pub vmi: Option<String>,
}

/// Body of `GET /api/config`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub mode: ServerMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_vmi: Option<String>,
}

/// `GET /ws`: upgrade and bridge the requested console
pub async fn console_socket(
    State(state): State<WebState>,
    Query(query): Query<ConsoleQuery>,
    remote: Option<ConnectInfo<SocketAddr>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let target = match state
        .settings
        .resolve_target(query.namespace.as_deref(), query.vmi.as_deref())
    {
        Ok(target) => target,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::warn!("websocket upgrade failed: {}", rejection);
            return rejection.into_response();
        }
    };

    let remote = remote
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    upgrade.on_upgrade(move |socket| handle_socket(state, target, remote, socket))
}

async fn handle_socket(state: WebState, target: ConsoleTarget, remote: String, socket: WebSocket) {
    tracing::info!(
        "websocket connected: remote={} namespace={} vmi={}",
        remote,
        target.namespace,
        target.name
    );

    let (sink, source) = ws::split(socket);
    let termination = bridge::serve_console(
        state.provider.clone(),
        target.clone(),
        state.settings.timeout,
        sink,
        source,
        &state.shutdown,
    )
    .await;

    tracing::info!(
        "websocket disconnected: namespace={} vmi={} ({})",
        target.namespace,
        target.name,
        termination
    );
}

/// `GET /api/config`: how the server selects consoles
pub async fn config(State(state): State<WebState>) -> Json<ConfigResponse> {
    let settings = &state.settings;
    Json(ConfigResponse {
        mode: settings.mode(),
        default_namespace: settings.default_namespace.clone(),
        initial_namespace: settings.initial_namespace.clone(),
        fixed_namespace: settings.fixed_namespace.clone(),
        fixed_vmi: settings.fixed_vmi.clone(),
    })
}
