//! Fixed-interval rate limiter.
//!
//! A [`Throttle`] hands out permits no closer together than its interval.
//! It is shared by reference (or `Arc`) between every caller that must respect
//! the same third-party limit, whether they run sequentially or concurrently.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

pub struct Throttle {
    interval: Duration,
    // None when the interval is zero.
    limiter: Option<DefaultDirectRateLimiter>,
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle").field("interval", &self.interval).finish()
    }
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        // A burst of one keeps every permit a full interval after the last.
        let limiter = Quota::with_period(interval)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self { interval, limiter }
    }

    /// Wait until `interval` has elapsed since the previous permit, then take
    /// a permit. The first call never waits.
    pub async fn wait(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        if limiter.check().is_err() {
            debug!(interval_ms = self.interval.as_millis() as u64, "Throttling");
            limiter.until_ready().await;
        }
    }
}
