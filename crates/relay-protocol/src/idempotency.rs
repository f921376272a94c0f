//! Idempotency key and persisted record shapes (spec §3, §4.I, §6).

use crate::request::Response;
use serde::{Deserialize, Serialize};

/// `(task_id, idempotency_key)` — the unit of deduplication for retried
/// caller submissions. Distinct from `Request::request_id`, which
/// identifies a single wire attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub task_id: String,
    pub idempotency_key: String,
}

impl IdempotencyKey {
    pub fn new(task_id: impl Into<String>, idempotency_key: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            idempotency_key: idempotency_key.into(),
        }
    }
}

/// A row of `action_idempotency`: the response produced the first time a
/// given key was observed, persisted so later retries short-circuit
/// without re-submitting to the worker (spec invariant 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub response: Response,
    /// RFC3339 UTC timestamp of first completion.
    pub created_at: String,
}
