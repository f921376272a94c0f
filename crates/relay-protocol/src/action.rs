//! The action catalogue: names, risk tiers, and parameter schemas.
//!
//! The catalogue is a compile-time table, not something loaded from config.
//! Adding an action means touching this table, the executor registry in
//! `relay-executors`, and (if the action needs one) the lock map in
//! `relay-policy` — the "four places" called out in the design notes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Risk tier governing whether an action runs immediately, needs operator
/// approval, or never runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Executes immediately once all gates pass.
    Auto,
    /// Executes only after operator approval (or a caller-supplied
    /// `confirmed: true`).
    Confirm,
    /// Never executes; a synthetic rejection.
    Blocked,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Auto => "auto",
            Tier::Confirm => "confirm",
            Tier::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Side-effect class of an action, used only for audit/reporting; it does
/// not gate execution on its own (the tier does that).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffect {
    ReadOnly,
    Write,
    Admin,
}

/// Static schema for one action: its tier, required parameters, and
/// side-effect class. Parameter *values* are validated generically by
/// `relay-policy` (length, shell-meta, path-jail); this schema only records
/// which parameters must be present.
#[derive(Debug, Clone)]
pub struct ActionSchema {
    pub name: &'static str,
    pub tier: Tier,
    pub required_params: &'static [&'static str],
    pub side_effect: SideEffect,
}

/// The compile-time action catalogue.
///
/// An action name absent from this table is implicitly `BLOCKED` — see
/// [`resolve_tier`].
pub static ACTIONS: &[ActionSchema] = &[
    ActionSchema {
        name: "git_status",
        tier: Tier::Auto,
        required_params: &["working_dir"],
        side_effect: SideEffect::ReadOnly,
    },
    ActionSchema {
        name: "git_diff",
        tier: Tier::Auto,
        required_params: &["working_dir"],
        side_effect: SideEffect::ReadOnly,
    },
    ActionSchema {
        name: "git_log",
        tier: Tier::Auto,
        required_params: &["working_dir"],
        side_effect: SideEffect::ReadOnly,
    },
    ActionSchema {
        name: "git_commit",
        tier: Tier::Confirm,
        required_params: &["working_dir", "message"],
        side_effect: SideEffect::Write,
    },
    ActionSchema {
        name: "git_push",
        tier: Tier::Confirm,
        required_params: &["working_dir"],
        side_effect: SideEffect::Write,
    },
    ActionSchema {
        name: "run_tests",
        tier: Tier::Auto,
        required_params: &["working_dir"],
        side_effect: SideEffect::ReadOnly,
    },
    ActionSchema {
        name: "install_dependencies",
        tier: Tier::Confirm,
        required_params: &["working_dir", "manager"],
        side_effect: SideEffect::Write,
    },
    ActionSchema {
        name: "docker_build",
        tier: Tier::Confirm,
        required_params: &["working_dir", "tag"],
        side_effect: SideEffect::Admin,
    },
    ActionSchema {
        name: "file_read",
        tier: Tier::Auto,
        required_params: &["file"],
        side_effect: SideEffect::ReadOnly,
    },
    ActionSchema {
        name: "file_write",
        tier: Tier::Confirm,
        required_params: &["file", "content"],
        side_effect: SideEffect::Write,
    },
    ActionSchema {
        name: "create_directory",
        tier: Tier::Confirm,
        required_params: &["directory"],
        side_effect: SideEffect::Write,
    },
    ActionSchema {
        name: "list_directory",
        tier: Tier::Auto,
        required_params: &["directory"],
        side_effect: SideEffect::ReadOnly,
    },
    ActionSchema {
        name: "close_app",
        tier: Tier::Confirm,
        required_params: &["name"],
        side_effect: SideEffect::Admin,
    },
    ActionSchema {
        name: "zip_project",
        tier: Tier::Auto,
        required_params: &["working_dir"],
        side_effect: SideEffect::ReadOnly,
    },
    ActionSchema {
        name: "ollama_chat",
        tier: Tier::Auto,
        required_params: &["messages", "model"],
        side_effect: SideEffect::ReadOnly,
    },
    ActionSchema {
        name: "web_search",
        tier: Tier::Auto,
        required_params: &["query"],
        side_effect: SideEffect::ReadOnly,
    },
];

/// Names explicitly listed in the catalogue with `Tier::Blocked`, kept
/// separate from "simply absent" so the audit trail can distinguish
/// "explicitly blocked" from "unknown action" while treating both
/// identically for dispatch purposes.
pub static EXPLICITLY_BLOCKED: &[&str] = &["format_disk", "shutdown_host", "delete_all"];

static ACTION_NAMES: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| ACTIONS.iter().map(|a| a.name).collect());

/// Look up an action's static schema by name.
pub fn find(name: &str) -> Option<&'static ActionSchema> {
    ACTIONS.iter().find(|a| a.name == name)
}

/// Resolve the tier for an action name: registry lookup, then the
/// explicitly-blocked list, then implicit BLOCKED for anything else.
///
/// Mirrors spec §4.D.2: "Look up action in `AUTO` set → AUTO; else
/// `CONFIRM` set → CONFIRM; else BLOCKED (distinguish explicitly-listed
/// blocked names in the reason for better audit, but treat identically)."
pub fn resolve_tier(name: &str) -> (Tier, bool) {
    if let Some(schema) = find(name) {
        return (schema.tier, false);
    }
    let explicit = EXPLICITLY_BLOCKED.contains(&name);
    (Tier::Blocked, explicit)
}

/// All action names with tier AUTO or CONFIRM — sent as `capabilities` in
/// the worker's `agent_hello` frame.
pub fn capabilities() -> Vec<&'static str> {
    ACTIONS
        .iter()
        .filter(|a| a.tier != Tier::Blocked)
        .map(|a| a.name)
        .collect()
}

pub fn is_known(name: &str) -> bool {
    ACTION_NAMES.contains(name)
}
