//! End-to-end coverage of the gateway's HTTP API and websocket acceptor
//! against an in-process mock Worker, exercising the invariants that
//! can't be checked from a single module in isolation: the at-most-one
//! upstream submission guarantee, the single-agent invariant and its
//! close codes, and the idempotency replay path across HTTP retries.

use futures_util::{SinkExt, StreamExt};
use relay_gateway::idempotency::IdempotencyStore;
use relay_gateway::server::{build_router, AppState};
use relay_gateway::session::GatewayLink;
use relay_protocol::{ActionResult, ClientFrame, ServerFrame};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

const AUTH_TOKEN: &str = "test-token";

struct TestGateway {
    http_base: String,
    ws_url: String,
    _db: tempfile::TempDir,
}

async fn spawn_gateway(force_ssh: bool) -> TestGateway {
    let db = tempfile::tempdir().unwrap();
    let idempotency = Arc::new(IdempotencyStore::open(&db.path().join("idem.sqlite3")).unwrap());

    let state = AppState {
        link: GatewayLink::new(),
        idempotency,
        auth_token: Arc::from(AUTH_TOKEN),
        force_ssh,
        ssh: None,
        ssh_health: None,
        ssh_target: None,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    // Give the acceptor task a tick to start listening.
    tokio::time::sleep(Duration::from_millis(20)).await;

    TestGateway {
        http_base: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/ws"),
        _db: db,
    }
}

/// Connects a mock worker, sends `agent_hello`, and replies to every
/// `action_request` it sees with a canned success result. Returns a
/// handle whose drop closes the connection.
async fn attach_mock_worker(ws_url: &str, token: &str) -> tokio::task::JoinHandle<()> {
    let mut request = ws_url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {token}").parse().unwrap());
    let (ws_stream, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Text(
            serde_json::to_string(&ClientFrame::AgentHello {
                agent_version: "0.1.0-test".to_string(),
                capabilities: vec!["git_status".to_string()],
            })
            .unwrap()
            .into(),
        ))
        .await
        .unwrap();

    tokio::spawn(async move {
        while let Some(Ok(Message::Text(text))) = read.next().await {
            let Ok(ServerFrame::ActionRequest { request_id, action, .. }) =
                serde_json::from_str::<ServerFrame>(&text)
            else {
                continue;
            };
            let response = relay_protocol::Response::success(
                request_id,
                action,
                ActionResult::new(0, "mock stdout", ""),
            );
            let frame = ClientFrame::ActionResponse { response };
            if write
                .send(Message::Text(serde_json::to_string(&frame).unwrap().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    })
}

#[tokio::test]
async fn status_reports_disconnected_and_agent_preferred_with_no_worker() {
    let gw = spawn_gateway(false).await;
    let resp: serde_json::Value = reqwest::get(format!("{}/status", gw.http_base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["agent_connected"], json!(false));
    assert_eq!(resp["execution_mode"], json!("agent_preferred"));
    assert_eq!(resp["ssh_fallback_enabled"], json!(false));
}

#[tokio::test]
async fn action_with_no_worker_and_no_ssh_fallback_is_service_unavailable() {
    let gw = spawn_gateway(false).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/action", gw.http_base))
        .json(&json!({ "action": "git_status", "params": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn action_round_trips_through_an_attached_worker() {
    let gw = spawn_gateway(false).await;
    let _worker = attach_mock_worker(&gw.ws_url, AUTH_TOKEN).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let resp: serde_json::Value = client
        .post(format!("{}/action", gw.http_base))
        .json(&json!({ "action": "git_status", "params": {}, "confirmed": true }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp["status"], json!("success"));
    assert_eq!(resp["result"]["stdout"], json!("mock stdout"));
}

#[tokio::test]
async fn idempotent_retry_replays_the_cached_response_without_resubmitting() {
    let gw = spawn_gateway(false).await;
    let _worker = attach_mock_worker(&gw.ws_url, AUTH_TOKEN).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let body = json!({
        "action": "git_status",
        "params": {},
        "confirmed": true,
        "task_id": "task-1",
        "idempotency_key": "key-1",
    });

    let first: serde_json::Value = client
        .post(format!("{}/action", gw.http_base))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    // `idempotent_replay` is skip-serialized when false, so a fresh
    // submission's response simply omits the field.
    assert!(first.get("idempotent_replay").is_none());
    assert_ne!(first["request_id"], json!(null));

    let second: serde_json::Value = client
        .post(format!("{}/action", gw.http_base))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["idempotent_replay"], json!(true));
    assert_eq!(second["request_id"], first["request_id"]);
}

#[tokio::test]
async fn idempotency_key_without_task_id_is_a_bad_request() {
    let gw = spawn_gateway(false).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/action", gw.http_base))
        .json(&json!({ "action": "git_status", "params": {}, "idempotency_key": "key-only" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn second_concurrent_worker_is_closed_with_4002() {
    let gw = spawn_gateway(false).await;
    let _first = attach_mock_worker(&gw.ws_url, AUTH_TOKEN).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut request = gw.ws_url.as_str().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {AUTH_TOKEN}").parse().unwrap());
    let (ws_stream, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    let (_write, mut read) = ws_stream.split();

    let frame = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("gateway should close the duplicate connection promptly")
        .expect("stream should yield a close frame before ending");
    match frame.unwrap() {
        Message::Close(Some(close)) => assert_eq!(close.code, 4002u16.into()),
        other => panic!("expected a close frame with code 4002, got {other:?}"),
    }
}

#[tokio::test]
async fn worker_connection_without_bearer_token_is_closed_with_4001() {
    let gw = spawn_gateway(false).await;
    let request = gw.ws_url.as_str().into_client_request().unwrap();
    let (ws_stream, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    let (_write, mut read) = ws_stream.split();

    let frame = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("gateway should close the unauthenticated connection promptly")
        .expect("stream should yield a close frame before ending");
    match frame.unwrap() {
        Message::Close(Some(close)) => assert_eq!(close.code, 4001u16.into()),
        other => panic!("expected a close frame with code 4001, got {other:?}"),
    }
}

#[tokio::test]
async fn forced_ssh_mode_reports_emergency_stop_as_not_applicable() {
    let gw = spawn_gateway(true).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/emergency-stop", gw.http_base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn disconnecting_worker_fails_an_in_flight_action_as_agent_disconnected() {
    let gw = spawn_gateway(false).await;
    let worker = attach_mock_worker(&gw.ws_url, AUTH_TOKEN).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Kill the mock worker's task without it ever replying — simulates a
    // connection drop mid-flight (spec invariant 2).
    worker.abort();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/action", gw.http_base))
        .json(&json!({ "action": "git_status", "params": {}, "confirmed": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}
