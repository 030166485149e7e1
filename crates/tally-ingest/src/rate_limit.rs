//! Process-wide sliding-window rate limiter

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default number of calls allowed per window
pub const DEFAULT_RATE_LIMIT_CALLS: usize = 60;

/// Default window length
pub const DEFAULT_RATE_LIMIT_PERIOD: Duration = Duration::from_secs(60);

/// Grants at most `calls` slots in any trailing `period`.
///
/// Waiters queue on a fair mutex, so slots are handed out in arrival order.
/// The holder sleeps with the lock held; everyone behind it is waiting for the
/// same slot anyway.
#[derive(Debug)]
pub struct RateLimiter {
    calls: usize,
    period: Duration,
    granted: Mutex<VecDeque<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_CALLS, DEFAULT_RATE_LIMIT_PERIOD)
    }
}

impl RateLimiter {
    /// `calls` is clamped to at least one
    pub fn new(calls: usize, period: Duration) -> Self {
        let calls = calls.max(1);
        Self {
            calls,
            period,
            granted: Mutex::new(VecDeque::with_capacity(calls)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for a call slot. Never fails.
    pub async fn acquire(&self) {
        let mut granted = self.granted.lock().await;
        loop {
            let now = Instant::now();
            while granted
                .front()
                .is_some_and(|&at| now.duration_since(at) >= self.period)
            {
                granted.pop_front();
            }

            if granted.len() < self.calls {
                granted.push_back(now);
                return;
            }

            if let Some(&oldest) = granted.front() {
                let ready_at = oldest + self.period;
                debug!(
                    wait_ms = ready_at.saturating_duration_since(now).as_millis() as u64,
                    "Rate limit reached, waiting for slot"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
    }

    /// Slots still available in the current window, without waiting
    pub async fn available(&self) -> usize {
        let granted = self.granted.lock().await;
        let now = Instant::now();
        let live = granted
            .iter()
            .filter(|&&at| now.duration_since(at) < self.period)
            .count();
        self.calls.saturating_sub(live)
    }
}
