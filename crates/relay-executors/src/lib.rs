//! Concrete implementations of every action in the catalogue.
//!
//! Each executor takes the already-validated, already-path-jailed
//! parameter map and produces an [`relay_protocol::ActionResult`] or an
//! [`ExecutorError`] for conditions the validator can't catch up front
//! (a missing file, a process that fails to spawn). Everything that can
//! instead be expressed as a normal non-zero-`returncode` result is —
//! a timeout, an unsupported package manager, an oversized write — so the
//! caller always gets a reportable outcome rather than a dropped request.

mod archive;
mod build;
mod error;
mod filesystem;
mod git;
mod ollama;
mod params;
mod process;
mod registry;
mod system;
mod web_search;

pub use error::ExecutorError;
pub use registry::ExecutorRegistry;

use async_trait::async_trait;
use relay_protocol::{ActionParams, ActionResult};

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError>;
}
