//! Policy and audit layer for the relay worker.
//!
//! Composes the four gates the dispatch pipeline runs in order (spec §4.F):
//! emergency stop → tier resolution → parameter sanitisation → path-jail,
//! plus the two supporting subsystems consulted around the executor call:
//! named resource locks and the sliding-window rate limiter. [`audit`]
//! provides the append-only JSONL trail every outcome is recorded to.

pub mod audit;
pub mod emergency_stop;
pub mod locks;
pub mod rate_limiter;
pub mod validator;

pub use audit::{AuditLogger, AuditOutcome, AuditRecord};
pub use emergency_stop::EmergencyStop;
pub use locks::LockRegistry;
pub use rate_limiter::RateLimiter;
pub use validator::{AllowedRoots, SecurityViolation, Validator};
