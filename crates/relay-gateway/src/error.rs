//! Gateway-side error kinds (spec §7) and their HTTP status mapping.
//!
//! Kept `Clone` deliberately: idempotency followers need to observe the
//! same error the owner of an in-flight submission resolved with, and a
//! `Clone` value is the simplest way to hand it to every waiter.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("No agent connected and SSH fallback is not configured.")]
    AgentDisconnected,

    #[error("Agent did not respond in time.")]
    UpstreamTimeout,

    #[error("SSH action failed: {0}")]
    SshUnreachable(String),

    #[error("SSH fallback is not configured.")]
    SshNotConfigured,

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal agent error.")]
    Internal,

    /// Returned by `/emergency-stop` and `/resume` while the gateway is
    /// running in forced-SSH mode, where there is no websocket session to
    /// forward the control frame to (spec §4.I: "report not-applicable").
    #[error("Not applicable: {0}")]
    NotApplicable(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AgentDisconnected => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::SshUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::SshNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::NotApplicable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "status": "error", "error": self.to_string() }))).into_response()
    }
}
