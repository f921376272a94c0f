//! Outbound, persistent websocket connection to the gateway. The worker
//! is always the dialer — it never listens — so the gateway can live
//! behind a public address while the operator's machine stays unreachable
//! from outside.

use crate::router::Router;
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{ActionParams, ClientFrame, Request, Response, ServerFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(120);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_FRAME_SIZE: usize = 1024 * 1024;

pub struct WorkerIdentity {
    pub auth_token: String,
    pub agent_version: String,
    pub capabilities: Vec<&'static str>,
}

/// Reconnect forever with doubling backoff (capped) until `shutdown` is
/// cancelled. A successful connection that later drops resets the backoff
/// — only consecutive failures should make the worker back off harder.
pub async fn run(
    url: String,
    identity: WorkerIdentity,
    router: Arc<Router>,
    shutdown: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    while !shutdown.is_cancelled() {
        match connect_and_serve(&url, &identity, &router, &shutdown).await {
            Ok(()) => {
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                tracing::warn!(error = %e, "gateway connection lost");
            }
        }

        if shutdown.is_cancelled() {
            break;
        }

        tracing::info!(backoff_secs = backoff.as_secs(), "reconnecting after backoff");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.cancelled() => break,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

fn build_request(url: &str, auth_token: &str) -> anyhow::Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {auth_token}").parse()?,
    );
    Ok(request)
}

async fn connect_and_serve(
    url: &str,
    identity: &WorkerIdentity,
    router: &Arc<Router>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let config = WebSocketConfig::default().max_frame_size(Some(MAX_FRAME_SIZE));
    let connector = crate::tls::permissive_connector();
    let request = build_request(url, &identity.auth_token)?;

    let (ws_stream, _response) =
        tokio_tungstenite::connect_async_tls_with_config(request, Some(config), false, Some(connector))
            .await?;
    tracing::info!(%url, "connected to gateway");

    let (mut write, mut read) = ws_stream.split();

    let hello = ClientFrame::AgentHello {
        agent_version: identity.agent_version.clone(),
        capabilities: identity.capabilities.iter().map(|s| s.to_string()).collect(),
    };
    write
        .send(Message::Text(serde_json::to_string(&hello)?.into()))
        .await?;

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    let mut ping_deadline: Option<tokio::time::Instant> = None;
    let (outbox_tx, mut outbox_rx) = tokio::sync::mpsc::unbounded_channel::<ClientFrame>();

    loop {
        let pong_wait = async {
            match ping_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }

            _ = pong_wait => {
                anyhow::bail!("no pong within {:?}, treating connection as dead", PING_TIMEOUT);
            }

            _ = ping_interval.tick() => {
                write.send(Message::Ping(Vec::new().into())).await?;
                ping_deadline = Some(tokio::time::Instant::now() + PING_TIMEOUT);
            }

            Some(frame) = outbox_rx.recv() => {
                write.send(Message::Text(serde_json::to_string(&frame)?.into())).await?;
            }

            msg = read.next() => {
                let Some(msg) = msg else { return Ok(()) };
                let msg = msg?;
                match msg {
                    Message::Pong(_) => { ping_deadline = None; }
                    Message::Ping(payload) => { write.send(Message::Pong(payload)).await?; }
                    Message::Close(_) => return Ok(()),
                    Message::Text(text) => {
                        handle_server_frame(&text, router, &outbox_tx);
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Parses and dispatches one inbound server frame. Per spec §4.G, a
/// frame that isn't valid JSON, or whose `type` tag names something this
/// worker doesn't recognise, is logged and ignored rather than treated
/// as a connection failure — only transport-level errors should tear
/// down and reconnect the websocket.
fn handle_server_frame(
    text: &str,
    router: &Arc<Router>,
    outbox: &tokio::sync::mpsc::UnboundedSender<ClientFrame>,
) {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unparseable server frame");
            return;
        }
    };
    match frame {
        ServerFrame::ActionRequest {
            request_id,
            action,
            params,
            confirmed,
        } => {
            let request = Request {
                request_id,
                action,
                params: params as ActionParams,
                confirmed,
                task_id: None,
                idempotency_key: None,
            };
            let request_id: Uuid = request_id;
            let router = router.clone();
            let outbox = outbox.clone();
            tokio::spawn(async move {
                let response: Response = router.dispatch(request).await;
                let _ = outbox.send(ClientFrame::ActionResponse { response });
                let _ = request_id;
            });
        }
        ServerFrame::EmergencyStop => {
            router.emergency_stop().set();
            let _ = outbox.send(ClientFrame::EmergencyStopAck {
                status: "stopped".to_string(),
            });
        }
        ServerFrame::Resume => {
            router.emergency_stop().clear();
            let _ = outbox.send(ClientFrame::ResumeAck {
                status: "resumed".to_string(),
            });
        }
        ServerFrame::Ping => {
            let _ = outbox.send(ClientFrame::Pong);
        }
    }
}
