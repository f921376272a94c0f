//! Binds action names from the protocol catalogue to their concrete
//! executor implementation. Built once at worker startup.

use crate::archive::ZipProject;
use crate::build::{DockerBuild, InstallDependencies, RunTests};
use crate::error::ExecutorError;
use crate::filesystem::{CreateDirectory, FileRead, FileWrite, ListDirectory};
use crate::git::{GitCommit, GitDiff, GitLog, GitPush, GitStatus};
use crate::ollama::OllamaChat;
use crate::system::CloseApp;
use crate::web_search::WebSearch;
use crate::Executor;
use relay_protocol::{ActionParams, ActionResult};
use std::collections::HashMap;

pub struct ExecutorRegistry {
    executors: HashMap<&'static str, Box<dyn Executor>>,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        let mut executors: HashMap<&'static str, Box<dyn Executor>> = HashMap::new();
        executors.insert("git_status", Box::new(GitStatus));
        executors.insert("git_diff", Box::new(GitDiff));
        executors.insert("git_log", Box::new(GitLog));
        executors.insert("git_commit", Box::new(GitCommit));
        executors.insert("git_push", Box::new(GitPush));
        executors.insert("run_tests", Box::new(RunTests));
        executors.insert("install_dependencies", Box::new(InstallDependencies));
        executors.insert("docker_build", Box::new(DockerBuild));
        executors.insert("file_read", Box::new(FileRead));
        executors.insert("file_write", Box::new(FileWrite));
        executors.insert("create_directory", Box::new(CreateDirectory));
        executors.insert("list_directory", Box::new(ListDirectory));
        executors.insert("close_app", Box::new(CloseApp));
        executors.insert("zip_project", Box::new(ZipProject));
        executors.insert("ollama_chat", Box::new(OllamaChat::new()));
        executors.insert("web_search", Box::new(WebSearch));
        Self { executors }
    }

    pub async fn dispatch(
        &self,
        action: &str,
        params: &ActionParams,
    ) -> Result<ActionResult, ExecutorError> {
        let executor = self
            .executors
            .get(action)
            .ok_or_else(|| ExecutorError::Unregistered(action.to_string()))?;
        executor.execute(params).await
    }

    pub fn is_registered(&self, action: &str) -> bool {
        self.executors.contains_key(action)
    }
}
