//! The HTTP API (spec §4.I) and the websocket acceptor (spec §4.H),
//! wired onto a single shared [`AppState`].
//!
//! The HTTP surface is loopback-trusted by default and carries no bearer
//! check of its own; the websocket upgrade is the only place a presented
//! token is verified, because it is the only surface a Worker — possibly
//! reached across a public network — ever talks to.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{ActionParams, ClientFrame, IdempotencyKey, Response};
use relay_ssh::{HealthProbe, SshExecutor};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::idempotency::IdempotencyStore;
use crate::session::{GatewayLink, WorkerSession};

/// Everything a request handler needs, cloned cheaply per-request (every
/// field is an `Arc`/`Clone`-friendly handle, not owned state).
#[derive(Clone)]
pub struct AppState {
    pub link: GatewayLink,
    pub idempotency: Arc<IdempotencyStore>,
    pub auth_token: Arc<str>,
    pub force_ssh: bool,
    pub ssh: Option<Arc<SshExecutor>>,
    pub ssh_health: Option<HealthProbe>,
    pub ssh_target: Option<String>,
}

impl AppState {
    /// Resolve which transport services a submission: forced SSH always
    /// wins, then a connected Worker, then SSH fallback, per spec §4.I
    /// step 4.
    async fn dispatch_action(
        &self,
        action: &str,
        params: ActionParams,
        confirmed: bool,
    ) -> Result<Response, GatewayError> {
        if self.force_ssh {
            return self.dispatch_ssh(action, params).await;
        }
        if self.link.is_connected().await {
            return self.link.send_action(action, params, confirmed).await;
        }
        if self.ssh.is_some() {
            return self.dispatch_ssh(action, params).await;
        }
        Err(GatewayError::AgentDisconnected)
    }

    async fn dispatch_ssh(&self, action: &str, params: ActionParams) -> Result<Response, GatewayError> {
        let Some(ssh) = &self.ssh else {
            return Err(GatewayError::SshNotConfigured);
        };
        let request_id = Uuid::new_v4();
        match ssh.dispatch(action, &params).await {
            Ok(result) => Ok(Response::success(request_id, action, result)),
            Err(e) => Err(GatewayError::SshUnreachable(e.to_string())),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/action", post(action_handler))
        .route("/emergency-stop", post(emergency_stop_handler))
        .route("/resume", post(resume_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    let agent_connected = state.link.is_connected().await;
    let ssh_fallback_healthy = match &state.ssh_health {
        Some(probe) => probe.is_reachable().await,
        None => false,
    };
    let execution_mode = if state.force_ssh { "ssh_tunnel" } else { "agent_preferred" };

    Json(json!({
        "agent_connected": agent_connected,
        "ssh_fallback_enabled": state.ssh.is_some(),
        "ssh_fallback_healthy": ssh_fallback_healthy,
        "ssh_fallback_target": state.ssh_target,
        "execution_mode": execution_mode,
    }))
}

#[derive(Debug, Deserialize)]
struct ActionSubmission {
    action: String,
    #[serde(default)]
    params: ActionParams,
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
}

async fn action_handler(
    State(state): State<AppState>,
    Json(body): Json<ActionSubmission>,
) -> Result<Json<Response>, GatewayError> {
    if body.idempotency_key.is_some() && body.task_id.as_deref().unwrap_or("").is_empty() {
        return Err(GatewayError::BadRequest(
            "idempotency_key was supplied without task_id".to_string(),
        ));
    }

    let key = match (&body.task_id, &body.idempotency_key) {
        (Some(t), Some(k)) if !t.is_empty() && !k.is_empty() => {
            Some(IdempotencyKey::new(t.clone(), k.clone()))
        }
        _ => None,
    };

    let action = body.action.clone();
    let params = body.params.clone();
    let confirmed = body.confirmed;

    let (response, replay) = match key {
        Some(key) => {
            state
                .idempotency
                .submit(key, || async { state.dispatch_action(&action, params, confirmed).await })
                .await?
        }
        None => (state.dispatch_action(&action, params, confirmed).await?, false),
    };

    Ok(Json(if replay { response.with_replay_marker() } else { response }))
}

async fn emergency_stop_handler(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    if state.force_ssh {
        return Err(GatewayError::NotApplicable(
            "gateway is running in forced-SSH mode; there is no agent session to signal".to_string(),
        ));
    }
    state.link.send_emergency_stop().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn resume_handler(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    if state.force_ssh {
        return Err(GatewayError::NotApplicable(
            "gateway is running in forced-SSH mode; there is no agent session to signal".to_string(),
        ));
    }
    state.link.send_resume().await?;
    Ok(Json(json!({ "status": "ok" })))
}

fn check_bearer(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| presented == token)
}

async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let authorized = check_bearer(&headers, &state.auth_token);
    ws.on_upgrade(move |socket| handle_socket(socket, state, authorized))
}

/// One Worker connection's lifetime: auth check, singleton claim, then a
/// split read/write loop until disconnect (spec §4.H).
async fn handle_socket(mut socket: WebSocket, state: AppState, authorized: bool) {
    if !authorized {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 4001,
                reason: "Unauthorized".into(),
            })))
            .await;
        return;
    }

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();
    let session = WorkerSession::new(outbox_tx, Vec::new());
    if !state.link.try_attach(session).await {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 4002,
                reason: "Another agent is already connected".into(),
            })))
            .await;
        return;
    }
    tracing::info!("worker attached");

    let (mut write, mut read) = socket.split();

    let write_task = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                tracing::error!("failed to serialise outbound server frame");
                continue;
            };
            if write.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = read.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::AgentHello { agent_version, capabilities }) => {
                    tracing::info!(agent_version = %agent_version, capabilities = ?capabilities, "agent_hello received");
                    state.link.set_capabilities(capabilities).await;
                }
                Ok(ClientFrame::ActionResponse { response }) => {
                    state.link.resolve(response.request_id, response).await;
                }
                Ok(ClientFrame::EmergencyStopAck { status }) => {
                    tracing::debug!(status = %status, "emergency_stop_ack");
                }
                Ok(ClientFrame::ResumeAck { status }) => {
                    tracing::debug!(status = %status, "resume_ack");
                }
                Ok(ClientFrame::Pong) => {}
                Err(e) => tracing::debug!(error = %e, "ignoring unparseable client frame"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    write_task.abort();
    state.link.detach().await;
    tracing::info!("worker detached");
}
