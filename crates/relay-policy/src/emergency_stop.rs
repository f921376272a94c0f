//! Process-wide emergency-stop flag (spec §5, design note on global
//! mutable flags).
//!
//! Mutated only from the worker's websocket dispatch loop in response to
//! `emergency_stop`/`resume` control frames, and read by [`Validator`] as
//! the very first gate in the dispatch pipeline.
//!
//! [`Validator`]: crate::validator::Validator

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cheap, clonable handle to the shared emergency-stop flag.
#[derive(Clone, Default)]
pub struct EmergencyStop {
    flag: Arc<AtomicBool>,
}

impl EmergencyStop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Every subsequent request is rejected BLOCKED until
    /// [`Self::clear`] is called.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        tracing::warn!("emergency stop engaged — all execution suspended");
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
        tracing::info!("emergency stop cleared — execution resumed");
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        let stop = EmergencyStop::new();
        assert!(!stop.is_set());
    }

    #[test]
    fn set_and_clear_round_trip() {
        let stop = EmergencyStop::new();
        stop.set();
        assert!(stop.is_set());
        stop.clear();
        assert!(!stop.is_set());
    }

    #[test]
    fn clones_share_state() {
        let stop = EmergencyStop::new();
        let clone = stop.clone();
        stop.set();
        assert!(clone.is_set());
    }
}
