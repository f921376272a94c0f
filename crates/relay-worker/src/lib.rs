//! Library interface for `relay-worker`.
//!
//! Exposes the worker's internal modules for integration tests. The
//! binary entry-point lives in `main.rs`.

pub mod approval;
pub mod router;
pub mod tls;
pub mod ws_client;
