//! Per-session token bucket admission control.
//!
//! Every session owns one [`RateLimiter`]. Inbound client messages that find
//! the bucket empty are dropped by the caller; nothing is queued or retried.
//! The bucket refills continuously at `rate` tokens per second up to `burst`.

use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter refilling `rate` tokens per second with capacity `burst`.
    ///
    /// The bucket starts full.
    pub fn new(rate: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: f64::from(rate),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    pub fn allow(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (rounded down).
    pub fn available(&self) -> u32 {
        let bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = Instant::now().saturating_duration_since(bucket.last_refill);
        let tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        // bounded by burst, which came from a u32
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = tokens.floor() as u32;
        whole
    }
}
