//! Settle-delay rate limiter for outbound writes.
//!
//! Writes without response can be queued faster than the link drains them.
//! After each successful write the throttle holds the next one back for a
//! fixed delay. Failed writes do not arm it.

use std::time::Duration;
use tokio::time::Instant;

/// Holds outbound writes back for a fixed delay after each success.
#[derive(Debug, Clone)]
pub struct SendThrottle {
    settle: Duration,
    ready_at: Option<Instant>,
}

impl SendThrottle {
    /// Create a throttle with the given settle delay.
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            ready_at: None,
        }
    }

    /// Record a successful write, starting the settle delay.
    pub fn arm(&mut self) {
        self.ready_at = Some(Instant::now() + self.settle);
    }

    /// Instant from which the next write may go out, if it is held back.
    pub fn ready_at(&self) -> Option<Instant> {
        self.ready_at.filter(|at| *at > Instant::now())
    }

    /// Wait until a write may go out.
    pub async fn ready(&self) {
        if let Some(at) = self.ready_at() {
            tokio::time::sleep_until(at).await;
        }
    }
}
