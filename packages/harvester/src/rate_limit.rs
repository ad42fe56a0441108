//! Per-stream request accounting and the shared request ceiling.
//!
//! Each query stream (one window, or one enrichment run) owns a
//! [`RateLimitState`]. Streams never share one, so a cooldown in one stream
//! does not eat into another stream's count. The only thing streams share is
//! the [`RequestCeiling`], a governor token bucket that caps requests per
//! second across the whole process.

use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Requests issued since the last cooldown, for one stream.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    requests_since_cooldown: u32,
    total_requests: u64,
    cooldowns: u32,
    threshold: u32,
    cooldown: Duration,
}

impl RateLimitState {
    /// `threshold` of 0 disables the periodic cooldown.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            requests_since_cooldown: 0,
            total_requests: 0,
            cooldowns: 0,
            threshold,
            cooldown,
        }
    }

    /// Sleep off the cooldown if the threshold has been reached.
    pub async fn before_request(&mut self) {
        if self.threshold == 0 || self.requests_since_cooldown < self.threshold {
            return;
        }
        info!(
            requests = self.requests_since_cooldown,
            cooldown_secs = self.cooldown.as_secs(),
            "Request threshold reached, cooling down"
        );
        tokio::time::sleep(self.cooldown).await;
        self.cooldowns += 1;
        self.reset();
    }

    pub fn record_request(&mut self) {
        self.requests_since_cooldown += 1;
        self.total_requests += 1;
    }

    /// The transport already slept on our behalf; start counting afresh.
    pub fn note_cooldown(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.requests_since_cooldown = 0;
    }

    pub fn requests_since_cooldown(&self) -> u32 {
        self.requests_since_cooldown
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Sleep taken once the threshold is reached.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Periodic cooldowns this state has slept through.
    pub fn cooldowns(&self) -> u32 {
        self.cooldowns
    }
}

/// Process-wide requests-per-second cap shared by concurrent streams.
#[derive(Clone)]
pub struct RequestCeiling {
    limiter: Arc<DefaultRateLimiter>,
}

impl RequestCeiling {
    pub fn per_second(requests_per_second: u32) -> Result<Self, ConfigError> {
        let rate = NonZeroU32::new(requests_per_second).ok_or_else(|| {
            ConfigError::invalid("max_requests_per_second", "must be > 0")
        })?;
        Ok(Self::with_quota(Quota::per_second(rate)))
    }

    pub fn with_quota(quota: Quota) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Wait until one more request is allowed.
    pub async fn until_ready(&self) {
        self.limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_after_threshold() {
        let mut state = RateLimitState::new(2, Duration::from_secs(900));
        let start = tokio::time::Instant::now();

        for _ in 0..2 {
            state.before_request().await;
            state.record_request();
        }
        assert_eq!(state.cooldowns(), 0);

        state.before_request().await;
        assert_eq!(state.cooldowns(), 1);
        assert_eq!(state.requests_since_cooldown(), 0);
        assert!(start.elapsed() >= Duration::from_secs(900));
        assert_eq!(state.total_requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_threshold_never_sleeps() {
        let mut state = RateLimitState::new(0, Duration::from_secs(900));
        for _ in 0..10 {
            state.before_request().await;
            state.record_request();
        }
        assert_eq!(state.cooldowns(), 0);
    }

    #[test]
    fn test_transport_cooldown_resets_count() {
        let mut state = RateLimitState::new(10, Duration::from_secs(1));
        state.record_request();
        state.record_request();
        state.note_cooldown();
        assert_eq!(state.requests_since_cooldown(), 0);
        assert_eq!(state.total_requests(), 2);
    }

    #[test]
    fn test_ceiling_rejects_zero() {
        assert!(RequestCeiling::per_second(0).is_err());
    }
}
