//! Named resource locks (spec §4.B).
//!
//! A fixed set of process-local, fair-FIFO, non-recursive mutexes. The
//! dispatcher holds at most one lock per action and releases it whether
//! the executor succeeds or fails — expressed here as RAII: the returned
//! guard releases the lock on drop, so the caller cannot forget to
//! release it even on an early return or panic unwind.

use relay_protocol::ActionParams;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// The fixed lock namespace.
pub const LOCK_NAMES: &[&str] = &["npm_install", "pip_install", "git", "build", "port", "ollama"];

/// Maps an action name (and its parameters, for actions whose lock depends
/// on a parameter value) to the lock it must hold while executing, if any.
pub fn lock_name_for(action: &str, params: &ActionParams) -> Option<&'static str> {
    match action {
        "install_dependencies" => Some(resolve_install_lock(params)),
        "npm_install" => Some("npm_install"),
        "pip_install" => Some("pip_install"),
        "git_commit" | "git_push" | "git_status" | "git_diff" | "git_log" => Some("git"),
        "docker_build" | "run_tests" => Some("build"),
        "ollama_chat" => Some("ollama"),
        _ => None,
    }
}

/// `install_dependencies` picks its lock from `params.manager`: anything
/// that looks like a Python package manager takes `pip_install`, everything
/// else (including the default) takes `npm_install`.
fn resolve_install_lock(params: &ActionParams) -> &'static str {
    match params.get("manager").and_then(|v| v.as_str()) {
        Some("pip") | Some("poetry") | Some("uv") => "pip_install",
        _ => "npm_install",
    }
}

/// A guard holding one named lock. Releasing happens on drop.
pub struct LockGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Registry of the fixed lock namespace, built once at worker startup.
#[derive(Clone)]
pub struct LockRegistry {
    locks: Arc<HashMap<&'static str, Arc<Mutex<()>>>>,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        let locks = LOCK_NAMES
            .iter()
            .map(|&name| (name, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            locks: Arc::new(locks),
        }
    }

    /// Acquire the named lock for `action`/`params`, if the action maps to
    /// one. FIFO fairness and blocking-until-available come from
    /// `tokio::sync::Mutex`'s own queueing.
    pub async fn acquire(&self, action: &str, params: &ActionParams) -> Option<LockGuard> {
        let name = lock_name_for(action, params)?;
        let mutex = self
            .locks
            .get(name)
            .unwrap_or_else(|| panic!("unregistered lock name: {name}"))
            .clone();
        let guard = mutex.lock_owned().await;
        Some(LockGuard { _guard: guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn params_with_manager(manager: &str) -> ActionParams {
        let mut p = ActionParams::new();
        p.insert("manager".to_string(), json!(manager));
        p
    }

    #[test]
    fn install_dependencies_resolves_by_manager() {
        assert_eq!(
            resolve_install_lock(&params_with_manager("pip")),
            "pip_install"
        );
        assert_eq!(
            resolve_install_lock(&params_with_manager("npm")),
            "npm_install"
        );
        assert_eq!(resolve_install_lock(&ActionParams::new()), "npm_install");
    }

    #[test]
    fn actions_without_a_mapping_take_no_lock() {
        assert_eq!(lock_name_for("file_read", &ActionParams::new()), None);
    }

    #[tokio::test]
    async fn concurrent_same_lock_actions_serialise() {
        let registry = LockRegistry::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let registry2 = registry.clone();
        let order2 = order.clone();
        let first = tokio::spawn(async move {
            let _guard = registry2.acquire("git_status", &ActionParams::new()).await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            order2.lock().await.push(1);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;

        let registry3 = registry.clone();
        let order3 = order.clone();
        let second = tokio::spawn(async move {
            let _guard = registry3.acquire("git_diff", &ActionParams::new()).await;
            order3.lock().await.push(2);
        });

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn different_locks_do_not_block_each_other() {
        let registry = LockRegistry::new();
        let git_guard = registry.acquire("git_status", &ActionParams::new()).await;
        let build_guard = registry.acquire("run_tests", &ActionParams::new()).await;
        assert!(git_guard.is_some());
        assert!(build_guard.is_some());
    }
}
