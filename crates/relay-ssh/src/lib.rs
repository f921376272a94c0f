//! SSH fallback executor: the path taken when the gateway has no live
//! websocket session for a worker but still holds SSH connection details
//! for the operator's machine, gathered at pairing time.

mod client;
mod error;
mod executor;
mod health;
mod platform;
mod quoting;
mod sanitize;
mod web_search;

pub use client::SshConfig;
pub use error::SshError;
pub use executor::SshExecutor;
pub use health::HealthProbe;
pub use platform::Platform;
pub use web_search::{web_search, SearchResult};
