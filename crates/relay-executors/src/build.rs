//! Longer-running build/test/dependency actions, each with its own
//! timeout budget (spec default: 120s, installs 300s, docker builds 600s).

use crate::error::ExecutorError;
use crate::params::{optional_str, require_str};
use crate::process::{self, DOCKER_BUILD_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS, INSTALL_TIMEOUT_SECS};
use crate::Executor;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use relay_protocol::{ActionParams, ActionResult};
use tokio::process::Command;

pub struct RunTests;

#[async_trait]
impl Executor for RunTests {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let working_dir = require_str(params, "working_dir")?;
        let mut cmd = Command::new("python3");
        cmd.current_dir(working_dir);
        cmd.args(["-m", "pytest", "-q"]);
        if let Some(target) = optional_str(params, "target") {
            cmd.arg(target);
        }
        process::run(cmd, DEFAULT_TIMEOUT_SECS).await
    }
}

pub struct InstallDependencies;

#[async_trait]
impl Executor for InstallDependencies {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let working_dir = require_str(params, "working_dir")?;
        let manager = require_str(params, "manager")?;

        let mut cmd = match manager {
            "npm" => {
                let mut c = Command::new("npm");
                c.arg("install");
                c
            }
            "yarn" => {
                let mut c = Command::new("yarn");
                c.arg("install");
                c
            }
            "pnpm" => {
                let mut c = Command::new("pnpm");
                c.arg("install");
                c
            }
            "pip" => {
                let mut c = Command::new("pip");
                c.args(["install", "-r", "requirements.txt"]);
                c
            }
            "poetry" => {
                let mut c = Command::new("poetry");
                c.arg("install");
                c
            }
            "uv" => {
                let mut c = Command::new("uv");
                c.arg("sync");
                c
            }
            other => {
                return Ok(ActionResult::new(
                    -1,
                    String::new(),
                    format!("unsupported package manager '{other}'"),
                ));
            }
        };
        cmd.current_dir(working_dir);
        process::run(cmd, INSTALL_TIMEOUT_SECS).await
    }
}

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._/:@-]+$").unwrap());

pub struct DockerBuild;

#[async_trait]
impl Executor for DockerBuild {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let working_dir = require_str(params, "working_dir")?;
        let tag = require_str(params, "tag")?;
        if !TAG_PATTERN.is_match(tag) {
            return Ok(ActionResult::new(
                -1,
                String::new(),
                format!("invalid docker tag '{tag}'"),
            ));
        }
        let mut cmd = Command::new("docker");
        cmd.current_dir(working_dir);
        cmd.args(["build", "-t", tag, "."]);
        process::run(cmd, DOCKER_BUILD_TIMEOUT_SECS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn install_dependencies_rejects_unknown_manager() {
        let mut params = ActionParams::new();
        params.insert("working_dir".to_string(), json!("."));
        params.insert("manager".to_string(), json!("cargo"));
        let result = InstallDependencies.execute(&params).await.unwrap();
        assert_eq!(result.returncode, -1);
        assert!(result.stderr.contains("unsupported"));
    }

    #[tokio::test]
    async fn docker_build_rejects_tag_with_shell_meta() {
        let mut params = ActionParams::new();
        params.insert("working_dir".to_string(), json!("."));
        params.insert("tag".to_string(), json!("app; rm -rf /"));
        let result = DockerBuild.execute(&params).await.unwrap();
        assert_eq!(result.returncode, -1);
        assert!(result.stderr.contains("invalid docker tag"));
    }

    #[test]
    fn tag_pattern_accepts_registry_qualified_tags() {
        assert!(TAG_PATTERN.is_match("ghcr.io/acme/app:1.2.3"));
        assert!(!TAG_PATTERN.is_match("app tag"));
    }
}
