//! `close_app`: the only action that terminates something other than a
//! process this worker itself spawned. Restricted to a fixed allow-list
//! of friendly names, each mapped to the exact process name `pkill`
//! matches against — never the caller-supplied string directly.

use crate::error::ExecutorError;
use crate::params::require_str;
use crate::process::{self, DEFAULT_TIMEOUT_SECS};
use crate::Executor;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use relay_protocol::{ActionParams, ActionResult};
use std::collections::HashMap;
use tokio::process::Command;

static ALLOWED_APPS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("vscode", "code"),
        ("chrome", "chrome"),
        ("firefox", "firefox"),
        ("slack", "slack"),
        ("docker_desktop", "Docker Desktop"),
        ("terminal", "Terminal"),
    ]
    .into_iter()
    .collect()
});

pub struct CloseApp;

#[async_trait]
impl Executor for CloseApp {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let name = require_str(params, "name")?;
        let Some(process_name) = ALLOWED_APPS.get(name) else {
            return Ok(ActionResult::new(
                -1,
                String::new(),
                format!("'{name}' is not in the allowed app list"),
            ));
        };
        let mut cmd = Command::new("pkill");
        cmd.args(["-x", process_name]);
        process::run(cmd, DEFAULT_TIMEOUT_SECS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_app_name_is_rejected_before_spawning_anything() {
        let mut params = ActionParams::new();
        params.insert("name".to_string(), json!("totally_unknown_app"));
        let result = CloseApp.execute(&params).await.unwrap();
        assert_eq!(result.returncode, -1);
        assert!(result.stderr.contains("not in the allowed app list"));
    }
}
