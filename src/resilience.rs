//! Resilience utilities: retry backoff and dispatch rate limiting.
//!
//! Two mechanisms protect the two clusters from overload:
//!
//! - [`RetryConfig`]: exponential backoff schedule, used per identity by the
//!   work queue ([`crate::queue::WorkQueue::add_rate_limited`]) and by the
//!   change source when resubscribing after a dropped watch.
//! - [`RateLimiter`]: token bucket bounding the overall reconcile dispatch
//!   rate across all identities. Per-identity backoff alone does not stop a
//!   flood of distinct identities from hammering the destination.

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

/// Configuration for retry backoff behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff for the work queue's failed-reconcile requeues.
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay
    /// -------  -----
    /// 1        100ms
    /// 2        200ms
    /// 3        400ms
    /// ...
    /// 9+       ~30s (cap)
    /// ```
    pub fn requeue() -> Self {
        Self::default()
    }

    /// Backoff for watch resubscription after a dropped subscription.
    ///
    /// Starts at 500ms and caps at 30s; the watch never gives up, it keeps
    /// resubscribing until shutdown.
    pub fn watch() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }

    /// Fast-fail backoff for tests.
    pub fn testing() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
            backoff_factor: 2.0,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        // Clamp the exponent: past ~1000 doublings the result is infinite
        // anyway and a raw cast to i32 would wrap.
        let exponent = attempt.saturating_sub(1).min(1_000) as i32;
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() {
            return self.max_delay;
        }
        let delay = Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()));

        std::cmp::min(delay, self.max_delay)
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Configuration for overall dispatch rate limiting.
///
/// Token bucket: tokens refill at `refill_rate` per second, up to
/// `burst_size` tokens. Each dispatched reconcile consumes one token.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens that can be accumulated (burst capacity).
    pub burst_size: u32,

    /// Tokens added per second (sustained rate).
    pub refill_rate: u32,
}

impl Default for RateLimitConfig {
    /// Default: 100 reconciles/sec with burst of 20.
    fn default() -> Self {
        Self {
            burst_size: 20,
            refill_rate: 100,
        }
    }
}

impl RateLimitConfig {
    /// No rate limiting (unlimited).
    pub fn unlimited() -> Self {
        Self {
            burst_size: u32::MAX,
            refill_rate: u32::MAX,
        }
    }
}

/// Token bucket rate limiter for reconcile dispatch.
///
/// Thread-safe and async-aware; shared by all workers.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        let limiter = GovLimiter::direct(quota);

        Self { limiter, config }
    }

    /// Acquire a permit, suspending until one is available.
    ///
    /// This method is cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Try to acquire a permit without suspending.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Get the current configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
