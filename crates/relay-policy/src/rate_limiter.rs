//! Sliding-window admission control (spec §4.C).

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A sliding-window counter: at most `max` calls to [`acquire`] succeed in
/// any trailing `window` of wall-clock time.
///
/// [`acquire`]: RateLimiter::acquire
pub struct RateLimiter {
    window: Duration,
    max: usize,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            window,
            max,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// 120 requests per 60-second window, matching spec defaults.
    pub fn default_policy() -> Self {
        Self::new(120, Duration::from_secs(60))
    }

    /// Evict timestamps older than `window`, then admit the caller if the
    /// remaining count is below `max`. Returns `true` if admitted.
    pub async fn acquire(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().await;
        Self::evict(&mut timestamps, now, self.window);
        if timestamps.len() >= self.max {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Number of additional calls that would currently be admitted.
    pub async fn remaining(&self) -> usize {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().await;
        Self::evict(&mut timestamps, now, self.window);
        self.max.saturating_sub(timestamps.len())
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn evict(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = timestamps.front() {
            if now.duration_since(oldest) > window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
