//! Small helpers for pulling typed values out of an [`ActionParams`] map.
//! The validator has already enforced length/shell-meta/path-jail rules by
//! the time an executor sees these; this module only handles "is the key
//! present and the right JSON type."

use crate::error::ExecutorError;
use relay_protocol::ActionParams;

pub fn require_str<'a>(params: &'a ActionParams, key: &str) -> Result<&'a str, ExecutorError> {
    params
        .get(key)
        .ok_or_else(|| ExecutorError::MissingParam(key.to_string()))?
        .as_str()
        .ok_or_else(|| ExecutorError::WrongParamType {
            key: key.to_string(),
            expected: "string",
        })
}

pub fn optional_str<'a>(params: &'a ActionParams, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn optional_bool(params: &ActionParams, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn optional_u64(params: &ActionParams, key: &str, default: u64) -> u64 {
    params.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

pub fn optional_f64(params: &ActionParams, key: &str, default: f64) -> f64 {
    params.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}
