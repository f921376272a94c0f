//! JSON websocket frames exchanged between gateway and worker (spec §6).
//!
//! Every frame carries a `type` discriminator. Unknown `type` values must
//! not fail to parse the envelope — callers match on `ClientFrame`/
//! `ServerFrame` and log-and-ignore anything that doesn't fit, per spec
//! §4.G ("anything else → log, ignore").

use crate::request::{ActionParams, Request, Response};
use serde::{Deserialize, Serialize};

/// Frames sent from the gateway to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "action_request")]
    ActionRequest {
        request_id: uuid::Uuid,
        action: String,
        #[serde(default)]
        params: ActionParams,
        #[serde(default)]
        confirmed: bool,
    },
    #[serde(rename = "emergency_stop")]
    EmergencyStop,
    #[serde(rename = "resume")]
    Resume,
    #[serde(rename = "ping")]
    Ping,
}

impl From<&Request> for ServerFrame {
    fn from(req: &Request) -> Self {
        ServerFrame::ActionRequest {
            request_id: req.request_id,
            action: req.action.clone(),
            params: req.params.clone(),
            confirmed: req.confirmed,
        }
    }
}

/// Frames sent from the worker to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "agent_hello")]
    AgentHello {
        agent_version: String,
        capabilities: Vec<String>,
    },
    #[serde(rename = "action_response")]
    ActionResponse {
        #[serde(flatten)]
        response: Response,
    },
    #[serde(rename = "emergency_stop_ack")]
    EmergencyStopAck { status: String },
    #[serde(rename = "resume_ack")]
    ResumeAck { status: String },
    #[serde(rename = "pong")]
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_request_round_trips() {
        let req = Request {
            request_id: uuid::Uuid::new_v4(),
            action: "git_status".into(),
            params: ActionParams::new(),
            confirmed: true,
            task_id: None,
            idempotency_key: None,
        };
        let frame = ServerFrame::from(&req);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"action_request\""));
        let parsed: ServerFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            ServerFrame::ActionRequest {
                request_id,
                action,
                confirmed,
                ..
            } => {
                assert_eq!(request_id, req.request_id);
                assert_eq!(action, "git_status");
                assert!(confirmed);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_frame_type_fails_to_parse_but_does_not_panic() {
        let raw = r#"{"type":"something_new","foo":"bar"}"#;
        let parsed: Result<ServerFrame, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn control_acks_serialise_with_expected_shape() {
        let frame = ClientFrame::EmergencyStopAck {
            status: "stopped".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "emergency_stop_ack");
        assert_eq!(json["status"], "stopped");
    }
}
