//! The security validator: the ordered gate chain from spec §4.D.
//!
//! 1. Emergency stop
//! 2. Tier resolution
//! 3. Parameter sanitisation
//! 4. Path-jail
//!
//! Each step raises a [`SecurityViolation`] carrying a human-readable
//! reason and (where relevant) the tier the violation should be audited
//! under.

use crate::emergency_stop::EmergencyStop;
use once_cell::sync::Lazy;
use regex::Regex;
use relay_protocol::{ActionParams, Tier, action};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Parameter keys whose string values are exempt from the length/shell-meta
/// checks — free-form prose fields, not shell-facing values.
const EXEMPT_KEYS: &[&str] = &[
    "content",
    "description",
    "message",
    "messages",
    "system",
    "tools",
];

/// Parameter keys that must resolve inside an allowed root.
const PATH_KEYS: &[&str] = &["path", "directory", "project_dir", "file", "working_dir"];

const MAX_PARAM_LEN: usize = 4096;

static SHELL_META: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[;&|`$(){}!<>"']"#).unwrap());

#[derive(Debug, Error)]
pub enum SecurityViolation {
    #[error("Emergency stop is active — all execution suspended.")]
    EmergencyStop,

    #[error("Action '{name}' is {} blocked", if *explicit { "explicitly" } else { "implicitly" })]
    BlockedAction { name: String, explicit: bool },

    #[error("Parameter '{key}' exceeds the maximum length of {max} characters.")]
    ParamTooLong { key: String, max: usize },

    #[error("Parameter '{key}' contains disallowed shell metacharacters.")]
    ShellMeta { key: String },

    #[error("Path '{attempted}' is outside allowed roots.")]
    PathEscape { key: String, attempted: String },
}

impl SecurityViolation {
    /// The tier this violation should be recorded under in the audit log.
    pub fn tier(&self) -> Tier {
        Tier::Blocked
    }
}

/// A static, process-wide list of canonicalised filesystem roots. Path
/// parameters must resolve to one of these or a descendant of one.
#[derive(Clone, Debug)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    /// Canonicalise every given root up front; a root that doesn't exist
    /// on disk is skipped with a warning rather than failing startup,
    /// since a worker may be configured with roots that get created later.
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let canonical = roots
            .into_iter()
            .filter_map(|root| match root.canonicalize() {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "allowed root does not resolve, skipping");
                    None
                }
            })
            .collect();
        Self { roots: canonical }
    }

    /// Parse from a `;`- or `,`-delimited environment value, per spec §6.
    pub fn from_env_value(value: &str) -> Self {
        let roots = value
            .split([';', ','])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        Self::new(roots)
    }

    /// Canonicalise `value` and check it is equal to or a descendant of
    /// one of the allowed roots. Any I/O failure (missing path, permission
    /// denied, or a cross-volume error on Windows) is treated as a
    /// rejection rather than propagated, per spec's boundary case.
    pub fn canonicalize_and_check(&self, value: &str) -> Result<PathBuf, String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(format!("Path '{value}' is outside allowed roots."));
        }
        let candidate = Path::new(trimmed);
        let canonical = match candidate.canonicalize() {
            Ok(c) => c,
            Err(_) => return Err(format!("Path '{value}' is outside allowed roots.")),
        };
        if self.contains(&canonical) {
            Ok(canonical)
        } else {
            Err(format!("Path '{}' is outside allowed roots.", canonical.display()))
        }
    }

    fn contains(&self, canonical: &Path) -> bool {
        self.roots.iter().any(|root| canonical.starts_with(root))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// The ordered validation chain. Holds the shared emergency-stop flag and
/// the static allowed-roots list; stateless otherwise (tier resolution
/// reads the compile-time catalogue in `relay_protocol::action`).
#[derive(Clone)]
pub struct Validator {
    emergency_stop: EmergencyStop,
    allowed_roots: AllowedRoots,
}

impl Validator {
    pub fn new(emergency_stop: EmergencyStop, allowed_roots: AllowedRoots) -> Self {
        Self {
            emergency_stop,
            allowed_roots,
        }
    }

    /// Step 1: refuse everything while the emergency stop is set.
    pub fn check_emergency_stop(&self) -> Result<(), SecurityViolation> {
        if self.emergency_stop.is_set() {
            return Err(SecurityViolation::EmergencyStop);
        }
        Ok(())
    }

    /// Step 2: resolve the action's tier, rejecting unknown/blocked names.
    pub fn validate_action(&self, name: &str) -> Result<Tier, SecurityViolation> {
        let (tier, explicit) = action::resolve_tier(name);
        if tier == Tier::Blocked {
            return Err(SecurityViolation::BlockedAction {
                name: name.to_string(),
                explicit,
            });
        }
        Ok(tier)
    }

    /// Step 3: length and shell-metacharacter checks on every non-exempt
    /// string parameter.
    pub fn validate_params(&self, params: &ActionParams) -> Result<(), SecurityViolation> {
        for (key, value) in params {
            if EXEMPT_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some(s) = value.as_str() else { continue };
            if s.len() > MAX_PARAM_LEN {
                return Err(SecurityViolation::ParamTooLong {
                    key: key.clone(),
                    max: MAX_PARAM_LEN,
                });
            }
            if SHELL_META.is_match(s) {
                return Err(SecurityViolation::ShellMeta { key: key.clone() });
            }
        }
        Ok(())
    }

    /// Step 4: canonicalise every path-valued parameter and check it
    /// resolves inside an allowed root, mutating `params` in place so
    /// executors only ever see canonical paths.
    pub fn validate_path_params(&self, params: &mut ActionParams) -> Result<(), SecurityViolation> {
        for key in PATH_KEYS {
            let Some(value) = params.get(*key).and_then(|v| v.as_str()).map(str::to_string)
            else {
                continue;
            };
            let canonical = self
                .allowed_roots
                .canonicalize_and_check(&value)
                .map_err(|_| SecurityViolation::PathEscape {
                    key: key.to_string(),
                    attempted: value.clone(),
                })?;
            params.insert(
                key.to_string(),
                serde_json::Value::String(canonical.to_string_lossy().into_owned()),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator_with_root(root: &Path) -> Validator {
        Validator::new(
            EmergencyStop::new(),
            AllowedRoots::new(std::iter::once(root.to_path_buf())),
        )
    }

    #[test]
    fn unknown_action_is_blocked_and_never_dispatched() {
        let validator = validator_with_root(Path::new("/tmp"));
        let err = validator.validate_action("nuke_everything").unwrap_err();
        assert!(matches!(err, SecurityViolation::BlockedAction { explicit: false, .. }));
    }

    #[test]
    fn explicitly_blocked_action_is_labelled_as_such() {
        let validator = validator_with_root(Path::new("/tmp"));
        let err = validator.validate_action("format_disk").unwrap_err();
        assert!(matches!(err, SecurityViolation::BlockedAction { explicit: true, .. }));
    }

    #[test]
    fn emergency_stop_preempts_everything() {
        let stop = EmergencyStop::new();
        stop.set();
        let validator = Validator::new(stop, AllowedRoots::new(std::iter::empty()));
        assert!(matches!(
            validator.check_emergency_stop(),
            Err(SecurityViolation::EmergencyStop)
        ));
    }

    #[test]
    fn exempt_keys_skip_length_and_shell_meta_checks() {
        let validator = validator_with_root(Path::new("/tmp"));
        let mut params = ActionParams::new();
        params.insert("message".to_string(), json!("rm -rf / ; echo pwned"));
        assert!(validator.validate_params(&params).is_ok());
    }

    #[test]
    fn non_exempt_shell_meta_is_rejected() {
        let validator = validator_with_root(Path::new("/tmp"));
        let mut params = ActionParams::new();
        params.insert("working_dir".to_string(), json!("/valid/root; rm -rf /"));
        let err = validator.validate_params(&params).unwrap_err();
        assert!(matches!(err, SecurityViolation::ShellMeta { .. }));
    }

    #[test]
    fn four_thousand_ninety_seven_chars_rejects() {
        let validator = validator_with_root(Path::new("/tmp"));
        let mut params = ActionParams::new();
        params.insert("working_dir".to_string(), json!("a".repeat(4097)));
        let err = validator.validate_params(&params).unwrap_err();
        assert!(matches!(err, SecurityViolation::ParamTooLong { .. }));
    }

    #[test]
    fn four_thousand_ninety_six_chars_is_accepted() {
        let validator = validator_with_root(Path::new("/tmp"));
        let mut params = ActionParams::new();
        params.insert("working_dir".to_string(), json!("a".repeat(4096)));
        assert!(validator.validate_params(&params).is_ok());
    }

    #[test]
    fn content_of_exactly_one_mib_is_accepted_regardless_of_length_check() {
        // `content` is exempt from the length check entirely (spec boundary
        // case targets file_write's own 1 MiB limit, enforced by the
        // executor, not the generic param-length gate).
        let validator = validator_with_root(Path::new("/tmp"));
        let mut params = ActionParams::new();
        params.insert("content".to_string(), json!("a".repeat(1_048_576)));
        assert!(validator.validate_params(&params).is_ok());
    }

    #[test]
    fn path_within_allowed_root_is_canonicalised_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("demo");
        std::fs::create_dir(&sub).unwrap();
        let validator = validator_with_root(dir.path());

        let mut params = ActionParams::new();
        params.insert(
            "working_dir".to_string(),
            json!(sub.to_string_lossy().to_string()),
        );
        validator.validate_path_params(&mut params).unwrap();
        let got = params["working_dir"].as_str().unwrap();
        assert_eq!(PathBuf::from(got), sub.canonicalize().unwrap());
    }

    #[test]
    fn path_outside_allowed_roots_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let validator = validator_with_root(dir.path());
        let mut params = ActionParams::new();
        params.insert("file".to_string(), json!("/etc/passwd"));
        let err = validator.validate_path_params(&mut params).unwrap_err();
        assert!(matches!(err, SecurityViolation::PathEscape { .. }));
    }

    #[test]
    fn empty_or_whitespace_path_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let validator = validator_with_root(dir.path());
        let mut params = ActionParams::new();
        params.insert("file".to_string(), json!("   "));
        assert!(validator.validate_path_params(&mut params).is_err());
    }
}
