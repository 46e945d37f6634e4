//! Token-bucket rate limiting. The bucket/limiter core is shared; each
//! HTTP-facing crate supplies its own axum middleware wrapper that decides
//! what key to rate-limit on (Ingress keys by client certificate CN, the
//! Store's operator API keys by user id).

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 100, window: Duration::from_secs(60) }
    }
}

#[derive(Clone, Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    max_tokens: f64,
    refill_rate: f64,
}

impl TokenBucket {
    fn new(max_tokens: u32, window: Duration) -> Self {
        let refill_rate = max_tokens as f64 / window.as_secs_f64();
        Self { tokens: max_tokens as f64, last_refill: Instant::now(), max_tokens: max_tokens as f64, refill_rate }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn remaining(&self) -> u32 {
        self.tokens.floor() as u32
    }

    fn reset_after(&self) -> Duration {
        if self.tokens >= self.max_tokens {
            Duration::from_secs(0)
        } else {
            let tokens_needed = 1.0 - self.tokens;
            Duration::from_secs_f64((tokens_needed / self.refill_rate).max(0.0))
        }
    }
}

pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

pub struct RateLimiter {
    buckets: RwLock<HashMap<String, TokenBucket>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { buckets: RwLock::new(HashMap::new()), config }
    }

    pub async fn check(&self, key: &str) -> RateLimitResult {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.max_requests, self.config.window));

        let allowed = bucket.try_consume();
        RateLimitResult {
            allowed,
            limit: self.config.max_requests,
            remaining: bucket.remaining(),
            reset_after: bucket.reset_after(),
        }
    }

    pub async fn cleanup(&self) {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < Duration::from_secs(300));
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }
}

pub fn start_cleanup_task(limiter: std::sync::Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            limiter.cleanup().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_allows_up_to_max_requests() {
        let limiter = RateLimiter::new(RateLimitConfig { max_requests: 5, window: Duration::from_secs(1) });
        for _ in 0..5 {
            assert!(limiter.check("k").await.allowed);
        }
        assert!(!limiter.check("k").await.allowed);
    }

    #[tokio::test]
    async fn bucket_refills_over_time() {
        let limiter = RateLimiter::new(RateLimitConfig { max_requests: 2, window: Duration::from_millis(100) });
        assert!(limiter.check("k").await.allowed);
        assert!(limiter.check("k").await.allowed);
        assert!(!limiter.check("k").await.allowed);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.check("k").await.allowed);
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig { max_requests: 1, window: Duration::from_secs(10) });
        assert!(limiter.check("a").await.allowed);
        assert!(limiter.check("b").await.allowed);
        assert!(!limiter.check("a").await.allowed);
    }
}
