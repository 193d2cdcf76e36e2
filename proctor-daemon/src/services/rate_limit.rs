//! Rate limiting for the webhook intake endpoint.
//!
//! The intake path is unauthenticated by design (the payload signature is
//! checked inside the gateway abstraction), so it gets a sustained-rate
//! limiter with burst headroom in front of it.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

/// Request rejected because the sustained rate was exceeded.
#[derive(Debug, thiserror::Error)]
#[error("rate limit exceeded")]
pub struct RateLimited;

/// Token-bucket limiter for webhook deliveries.
pub struct WebhookRateLimiter {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl WebhookRateLimiter {
    /// Create a limiter with a sustained per-second rate and a burst size.
    /// Zero values fall back to the defaults (2/s, burst 10).
    pub fn new(per_second: u32, burst_size: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::new(2).unwrap());
        let burst_size = NonZeroU32::new(burst_size).unwrap_or(NonZeroU32::new(10).unwrap());

        let quota = Quota::per_second(per_second).allow_burst(burst_size);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Check whether a delivery may proceed.
    pub fn check(&self) -> Result<(), RateLimited> {
        match self.limiter.check() {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!("webhook rate limit exceeded");
                Err(RateLimited)
            }
        }
    }
}

impl Default for WebhookRateLimiter {
    fn default() -> Self {
        Self::new(2, 10)
    }
}

impl Clone for WebhookRateLimiter {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn allows_burst_then_limits() {
        let limiter = WebhookRateLimiter::new(1, 5);

        for i in 0..5 {
            assert!(limiter.check().is_ok(), "request {i} should fit the burst");
        }
        assert!(limiter.check().is_err());
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = WebhookRateLimiter::new(10, 1);

        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());

        // 10/s refills one token every 100ms.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn zero_config_falls_back_to_defaults() {
        let limiter = WebhookRateLimiter::new(0, 0);
        for _ in 0..10 {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }
}
