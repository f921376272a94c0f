//! Executor-local error type. Every variant maps to an `ActionResult` with
//! a non-zero `returncode` and a message in `stderr`, never to a dropped
//! connection — the worker always answers the gateway with *something*.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no executor registered for action '{0}'")]
    Unregistered(String),

    #[error("missing required parameter '{0}'")]
    MissingParam(String),

    #[error("parameter '{key}' has the wrong type: expected {expected}")]
    WrongParamType { key: String, expected: &'static str },

    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
