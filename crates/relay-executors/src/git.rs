//! Git action executors. Every command is built with `argv`-only arguments
//! — never a shell string — so git's own argument parsing is the only
//! thing standing between a parameter value and the command line.

use crate::error::ExecutorError;
use crate::params::{optional_str, require_str};
use crate::process::{self, DEFAULT_TIMEOUT_SECS};
use crate::Executor;
use async_trait::async_trait;
use relay_protocol::{ActionParams, ActionResult};
use tokio::process::Command;

fn git_command(working_dir: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(working_dir);
    cmd.args(args);
    cmd
}

pub struct GitStatus;

#[async_trait]
impl Executor for GitStatus {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let working_dir = require_str(params, "working_dir")?;
        let cmd = git_command(working_dir, &["status", "--short", "--branch"]);
        process::run(cmd, DEFAULT_TIMEOUT_SECS).await
    }
}

pub struct GitDiff;

#[async_trait]
impl Executor for GitDiff {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let working_dir = require_str(params, "working_dir")?;
        let mut args = vec!["diff"];
        if let Some(path) = optional_str(params, "file") {
            args.push("--");
            args.push(path);
        }
        let cmd = git_command(working_dir, &args);
        process::run(cmd, DEFAULT_TIMEOUT_SECS).await
    }
}

pub struct GitLog;

#[async_trait]
impl Executor for GitLog {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let working_dir = require_str(params, "working_dir")?;
        let limit = crate::params::optional_u64(params, "limit", 20).to_string();
        let cmd = git_command(
            working_dir,
            &["log", "--oneline", &format!("-{limit}")],
        );
        process::run(cmd, DEFAULT_TIMEOUT_SECS).await
    }
}

pub struct GitCommit;

#[async_trait]
impl Executor for GitCommit {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let working_dir = require_str(params, "working_dir")?;
        let message = require_str(params, "message")?;
        let mut cmd = git_command(working_dir, &["add", "-A"]);
        let add_result = process::run(cmd, DEFAULT_TIMEOUT_SECS).await?;
        if add_result.returncode != 0 {
            return Ok(add_result);
        }
        cmd = git_command(working_dir, &["commit", "-m", message]);
        process::run(cmd, DEFAULT_TIMEOUT_SECS).await
    }
}

pub struct GitPush;

#[async_trait]
impl Executor for GitPush {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let working_dir = require_str(params, "working_dir")?;
        let mut args = vec!["push"];
        if let Some(remote) = optional_str(params, "remote") {
            args.push(remote);
        }
        if let Some(branch) = optional_str(params, "branch") {
            args.push(branch);
        }
        let cmd = git_command(working_dir, &args);
        process::run(cmd, DEFAULT_TIMEOUT_SECS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::tempdir;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        StdCommand::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.name", "test"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn git_status_reports_clean_repo() {
        let dir = init_repo();
        let mut params = ActionParams::new();
        params.insert(
            "working_dir".to_string(),
            serde_json::json!(dir.path().to_string_lossy()),
        );
        let result = GitStatus.execute(&params).await.unwrap();
        assert_eq!(result.returncode, 0);
    }

    #[tokio::test]
    async fn git_commit_stages_and_commits() {
        let dir = init_repo();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let mut params = ActionParams::new();
        params.insert(
            "working_dir".to_string(),
            serde_json::json!(dir.path().to_string_lossy()),
        );
        params.insert("message".to_string(), serde_json::json!("add a.txt"));

        let result = GitCommit.execute(&params).await.unwrap();
        assert_eq!(result.returncode, 0);
    }

    #[tokio::test]
    async fn git_commit_missing_message_errors() {
        let dir = init_repo();
        let mut params = ActionParams::new();
        params.insert(
            "working_dir".to_string(),
            serde_json::json!(dir.path().to_string_lossy()),
        );
        assert!(matches!(
            GitCommit.execute(&params).await,
            Err(ExecutorError::MissingParam(_))
        ));
    }
}
