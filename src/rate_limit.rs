//! Request rate limiting for model backends

use governor::{Quota, RateLimiter as Governor};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::trace;

type DirectLimiter = Governor<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Process-wide limiter shared by every caller of one backend
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<DirectLimiter>,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_second`
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_second(rps);
        Self {
            limiter: Arc::new(Governor::direct(quota)),
        }
    }

    /// Wait until a request is allowed
    pub async fn wait(&self) {
        if self.limiter.check().is_err() {
            trace!("Rate limit reached, waiting");
            self.limiter.until_ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_limiter_spaces_requests() {
        let limiter = RateLimiter::new(5);
        let start = Instant::now();
        for _ in 0..7 {
            limiter.wait().await;
        }
        // Burst of 5 passes immediately, the rest wait for replenishment
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_zero_falls_back_to_one() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
