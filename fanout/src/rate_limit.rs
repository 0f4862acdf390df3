//! Sliding-window rate limiting over [`SharedBus::record_and_count`] (spec
//! §4.5: IP connection limit at accept time, per-connection message rate
//! once subscribed).

use crate::bus::SharedBus;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_events: u64,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(max_events: u64, window: Duration) -> Self {
        Self { max_events, window }
    }

    /// Default inbound-message budget: 600 messages per 60s (spec scenario
    /// 6 closes the connection on the 601st message within 60s).
    pub const MESSAGES: RateLimit = RateLimit::new(600, Duration::from_secs(60));

    /// Default per-IP concurrent-connection budget.
    pub const CONNECTIONS_PER_IP: RateLimit = RateLimit::new(20, Duration::from_secs(60));

    /// Default per-user subscription budget.
    pub const SUBSCRIPTIONS: RateLimit = RateLimit::new(100, Duration::from_secs(60));
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RateLimitOutcome {
    Allowed,
    Exceeded,
}

pub struct RateLimiter {
    bus: Arc<dyn SharedBus>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(bus: Arc<dyn SharedBus>) -> Self {
        Self { bus }
    }

    /// Records one event under `key` and reports whether it is still within
    /// `limit`'s budget. `now_ms` is caller-supplied (epoch milliseconds) so
    /// callers control the clock source in tests.
    pub async fn check(&self, key: &str, limit: RateLimit, now_ms: i64) -> Result<RateLimitOutcome, crate::bus::BusError> {
        let window_ms = limit.window.as_millis() as i64;
        let count = self.bus.record_and_count(key, now_ms, window_ms).await?;
        Ok(if count > limit.max_events {
            RateLimitOutcome::Exceeded
        } else {
            RateLimitOutcome::Allowed
        })
    }
}

pub fn ip_connection_key(ip: &str) -> String {
    format!("ws:conn:ip:{ip}")
}

pub fn message_key(connection_id: &str) -> String {
    format!("ws:msg:{connection_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemorySharedBus;

    #[tokio::test]
    async fn allows_events_under_the_cap() {
        let bus = InMemorySharedBus::new();
        let limiter = RateLimiter::new(bus);
        let limit = RateLimit::new(3, Duration::from_secs(60));
        for i in 0..3 {
            let outcome = limiter.check("k", limit, i * 1000).await.unwrap();
            assert_eq!(outcome, RateLimitOutcome::Allowed);
        }
    }

    #[tokio::test]
    async fn rejects_once_the_cap_is_exceeded() {
        let bus = InMemorySharedBus::new();
        let limiter = RateLimiter::new(bus);
        let limit = RateLimit::new(2, Duration::from_secs(60));
        limiter.check("k", limit, 0).await.unwrap();
        limiter.check("k", limit, 100).await.unwrap();
        let outcome = limiter.check("k", limit, 200).await.unwrap();
        assert_eq!(outcome, RateLimitOutcome::Exceeded);
    }
}
