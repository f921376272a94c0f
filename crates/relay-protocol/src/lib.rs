//! Shared data model and wire types for the relay gateway/worker pair.
//!
//! Both binaries depend on this crate so that the JSON frames they exchange
//! over the websocket, and the HTTP request/response bodies the gateway
//! serves, are defined exactly once.

pub mod action;
pub mod frame;
pub mod idempotency;
pub mod request;

pub use action::{SideEffect, Tier};
pub use frame::{ClientFrame, ServerFrame};
pub use idempotency::{IdempotencyKey, IdempotencyRecord};
pub use request::{ActionParams, ActionResult, Request, Response, ResponseStatus};
