//! Request/response shapes for both the HTTP API and the websocket frames
//! that carry them between gateway and worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Parameter map for an action. A `BTreeMap` (rather than `HashMap`) keeps
/// audit log serialisation and test fixtures byte-stable across runs.
pub type ActionParams = BTreeMap<String, Value>;

/// A single submission, identified at the wire level by `request_id` and,
/// optionally, at the caller level by `(task_id, idempotency_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: Uuid,
    pub action: String,
    #[serde(default)]
    pub params: ActionParams,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl Request {
    /// `(task_id, idempotency_key)` if both are present and non-empty,
    /// per spec §4.I: "if either is empty, skip."
    pub fn idempotency_pair(&self) -> Option<(String, String)> {
        match (&self.task_id, &self.idempotency_key) {
            (Some(t), Some(k)) if !t.is_empty() && !k.is_empty() => {
                Some((t.clone(), k.clone()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Captured subprocess output, truncated per spec §3 (stdout ≤ 8 KiB,
/// stderr ≤ 4 KiB).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

pub const STDOUT_LIMIT: usize = 8 * 1024;
pub const STDERR_LIMIT: usize = 4 * 1024;

impl ActionResult {
    pub fn new(returncode: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            returncode,
            stdout: truncate_utf8(stdout.into(), STDOUT_LIMIT),
            stderr: truncate_utf8(stderr.into(), STDERR_LIMIT),
        }
    }
}

/// Truncate `s` to at most `limit` bytes without splitting a UTF-8 code
/// point, appending a marker so callers can tell truncation happened.
pub fn truncate_utf8(mut s: String, limit: usize) -> String {
    if s.len() <= limit {
        return s;
    }
    let mut cut = limit;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s.push_str("…[truncated]");
    s
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: Uuid,
    pub status: ResponseStatus,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set by the gateway when this response is a cached answer to a
    /// retried `(task_id, idempotency_key)` pair rather than a fresh
    /// submission. Never set by the worker.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub idempotent_replay: bool,
}

impl Response {
    pub fn success(request_id: Uuid, action: impl Into<String>, result: ActionResult) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Success,
            action: action.into(),
            result: Some(result),
            error: None,
            idempotent_replay: false,
        }
    }

    pub fn error(request_id: Uuid, action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Error,
            action: action.into(),
            result: None,
            error: Some(error.into()),
            idempotent_replay: false,
        }
    }

    pub fn with_replay_marker(mut self) -> Self {
        self.idempotent_replay = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10); // 2 bytes each, 20 bytes total
        let truncated = truncate_utf8(s, 3);
        assert!(truncated.is_char_boundary(truncated.len() - "…[truncated]".len()));
    }

    #[test]
    fn idempotency_pair_requires_both_non_empty() {
        let mut req = Request {
            request_id: Uuid::new_v4(),
            action: "git_status".into(),
            params: ActionParams::new(),
            confirmed: false,
            task_id: Some("t1".into()),
            idempotency_key: None,
        };
        assert_eq!(req.idempotency_pair(), None);
        req.idempotency_key = Some("k1".into());
        assert_eq!(
            req.idempotency_pair(),
            Some(("t1".to_string(), "k1".to_string()))
        );
        req.task_id = Some(String::new());
        assert_eq!(req.idempotency_pair(), None);
    }
}
