//! The single-Worker session singleton and the request/response
//! correlation map (spec §3 `ExecSession`, §4.H, §5).
//!
//! Both are guarded by their own dedicated mutex, per the design notes:
//! the session singleton is mutated only on accept/disconnect, the waiter
//! map is mutated only on submit/respond/cancel-all.

use relay_protocol::{ActionParams, Response, ServerFrame};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

use crate::error::GatewayError;

/// Outcome delivered to a waiter: either the worker's response arrived, or
/// the connection dropped before it could (spec invariant 2).
#[derive(Debug, Clone)]
pub enum WaiterOutcome {
    Response(Response),
    AgentDisconnected,
}

/// State held for the single connected worker: the channel used to push
/// frames to its websocket write half, and the capabilities it advertised
/// in its `agent_hello`.
pub struct WorkerSession {
    outbox: mpsc::UnboundedSender<ServerFrame>,
    pub capabilities: Vec<String>,
}

impl WorkerSession {
    pub fn new(outbox: mpsc::UnboundedSender<ServerFrame>, capabilities: Vec<String>) -> Self {
        Self { outbox, capabilities }
    }

    fn send(&self, frame: ServerFrame) -> bool {
        self.outbox.send(frame).is_ok()
    }
}

type WaiterMap = Mutex<HashMap<Uuid, oneshot::Sender<WaiterOutcome>>>;

/// Shared handle held by the HTTP and websocket layers: the worker
/// singleton plus the correlation map used to route `action_response`
/// frames back to whichever `/action` call is awaiting them.
#[derive(Clone)]
pub struct GatewayLink {
    session: Arc<Mutex<Option<WorkerSession>>>,
    waiters: Arc<WaiterMap>,
}

impl Default for GatewayLink {
    fn default() -> Self {
        Self::new()
    }
}

const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(180);

impl GatewayLink {
    pub fn new() -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
            waiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Try to claim the singleton slot. Returns `false` (spec: close code
    /// 4002) if a worker is already attached.
    pub async fn try_attach(&self, session: WorkerSession) -> bool {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return false;
        }
        *guard = Some(session);
        true
    }

    /// Record the capabilities from an `agent_hello` received after the
    /// singleton slot was already claimed (the handshake frame arrives
    /// on the read loop, slightly after `try_attach`).
    pub async fn set_capabilities(&self, capabilities: Vec<String>) {
        if let Some(session) = self.session.lock().await.as_mut() {
            session.capabilities = capabilities;
        }
    }

    /// Clear the singleton and cancel every outstanding waiter with a
    /// terminal `agent_disconnected` error (spec §4.H "Disconnect").
    pub async fn detach(&self) {
        *self.session.lock().await = None;
        let mut waiters = self.waiters.lock().await;
        for (_, tx) in waiters.drain() {
            let _ = tx.send(WaiterOutcome::AgentDisconnected);
        }
    }

    /// Deliver a worker's `action_response` to its waiter, if one is still
    /// registered (it may already have timed out and been removed).
    pub async fn resolve(&self, request_id: Uuid, response: Response) {
        if let Some(tx) = self.waiters.lock().await.remove(&request_id) {
            let _ = tx.send(WaiterOutcome::Response(response));
        }
    }

    /// Submit an action to the connected worker and await its response
    /// (spec §4.H "send_action"). Always removes the waiter on exit,
    /// whatever the outcome.
    pub async fn send_action(
        &self,
        action: &str,
        params: ActionParams,
        confirmed: bool,
    ) -> Result<Response, GatewayError> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(request_id, tx);

        let sent = {
            let guard = self.session.lock().await;
            match guard.as_ref() {
                Some(session) => session.send(ServerFrame::ActionRequest {
                    request_id,
                    action: action.to_string(),
                    params,
                    confirmed,
                }),
                None => false,
            }
        };

        if !sent {
            self.waiters.lock().await.remove(&request_id);
            return Err(GatewayError::AgentDisconnected);
        }

        let outcome = tokio::time::timeout(DEFAULT_ACTION_TIMEOUT, rx).await;
        self.waiters.lock().await.remove(&request_id);

        match outcome {
            Ok(Ok(WaiterOutcome::Response(response))) => Ok(response),
            Ok(Ok(WaiterOutcome::AgentDisconnected)) => Err(GatewayError::AgentDisconnected),
            Ok(Err(_)) => Err(GatewayError::AgentDisconnected),
            Err(_) => Err(GatewayError::UpstreamTimeout),
        }
    }

    /// Send an `emergency_stop` control frame. No-op reply is awaited; the
    /// worker's ack is only logged, per spec §4.H (acks are informational).
    pub async fn send_emergency_stop(&self) -> Result<(), GatewayError> {
        self.send_control(ServerFrame::EmergencyStop).await
    }

    pub async fn send_resume(&self) -> Result<(), GatewayError> {
        self.send_control(ServerFrame::Resume).await
    }

    async fn send_control(&self, frame: ServerFrame) -> Result<(), GatewayError> {
        let guard = self.session.lock().await;
        match guard.as_ref() {
            Some(session) if session.send(frame) => Ok(()),
            _ => Err(GatewayError::AgentDisconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::{ActionResult, ResponseStatus};

    #[tokio::test]
    async fn second_attach_is_refused_while_first_is_live() {
        let link = GatewayLink::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(link.try_attach(WorkerSession::new(tx1, vec![])).await);
        assert!(!link.try_attach(WorkerSession::new(tx2, vec![])).await);
    }

    #[tokio::test]
    async fn detach_cancels_outstanding_waiters() {
        let link = GatewayLink::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(link.try_attach(WorkerSession::new(tx, vec![])).await);

        let link2 = link.clone();
        let submit = tokio::spawn(async move {
            link2.send_action("git_status", ActionParams::new(), true).await
        });

        // Let send_action register its waiter and push the frame before we
        // simulate a disconnect.
        let _frame = rx.recv().await.unwrap();
        link.detach().await;

        let result = submit.await.unwrap();
        assert!(matches!(result, Err(GatewayError::AgentDisconnected)));
    }

    #[tokio::test]
    async fn resolve_delivers_response_to_the_matching_waiter() {
        let link = GatewayLink::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(link.try_attach(WorkerSession::new(tx, vec![])).await);

        let link2 = link.clone();
        let submit = tokio::spawn(async move {
            link2.send_action("git_status", ActionParams::new(), true).await
        });

        let frame = rx.recv().await.unwrap();
        let request_id = match frame {
            ServerFrame::ActionRequest { request_id, .. } => request_id,
            _ => panic!("expected ActionRequest"),
        };
        let response = Response {
            request_id,
            status: ResponseStatus::Success,
            action: "git_status".to_string(),
            result: Some(ActionResult::new(0, "", "")),
            error: None,
            idempotent_replay: false,
        };
        link.resolve(request_id, response).await;

        let result = submit.await.unwrap().unwrap();
        assert_eq!(result.status, ResponseStatus::Success);
    }
}
