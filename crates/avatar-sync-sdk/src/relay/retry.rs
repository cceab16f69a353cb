//! Reconnect timing
//!
//! Two independent policies:
//! - the transport's own reconnects use a fixed delay, forever
//! - the controller's setup retries wait a uniformly random delay in a window

use rand::Rng;
use std::time::Duration;

/// Fixed-delay retry policy handed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeverRetryPolicy {
    delay: Duration,
}

impl ForeverRetryPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Delay before reconnect attempt `attempt`; never gives up.
    pub fn next_retry_delay(&self, _attempt: u32) -> Option<Duration> {
        Some(self.delay)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for ForeverRetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Uniform random delay in `[min, max]`.
pub fn random_reconnect_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}
