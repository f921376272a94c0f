//! Library interface for `relay-gateway`.
//!
//! Exposes the gateway's internal modules for integration tests. The
//! binary entry-point lives in `main.rs`.

pub mod config;
pub mod error;
pub mod idempotency;
pub mod server;
pub mod session;
