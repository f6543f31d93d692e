//! Client-side configuration.
//!
//! All knobs are explicit values passed to constructors, so tests can vary
//! them per case.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tabctl_mediator::client::{ClientConfig, RetryPolicy};
//!
//! let config = ClientConfig::new()
//!     .with_retry(RetryPolicy::new().with_max_retries(5))
//!     .with_request_timeout(Duration::from_secs(5));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::protocol::Command;

// ============================================================================
// RetryPolicy
// ============================================================================

/// Retry with exponential backoff and jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Relative jitter applied to each delay (0.25 = ±25%).
    pub jitter: f64,
    /// HTTP statuses worth retrying.
    pub retryable_statuses: Vec<u16>,
}

impl RetryPolicy {
    /// Creates the default policy: 3 retries, 100ms doubling to 5s, ±25% jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.25,
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }

    /// Creates a policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::new()
        }
    }

    /// Sets the retry bound.
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the first and maximum delays.
    #[inline]
    #[must_use]
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Sets the relative jitter; `0.0` disables it.
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PoolConfig
// ============================================================================

/// Connection pool and circuit breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Consecutive probe failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls.
    pub cooldown: Duration,
    /// Period of the background health check.
    pub health_interval: Duration,
    /// Timeout for one health probe.
    pub probe_timeout: Duration,
}

impl PoolConfig {
    /// Creates the default settings: 3 failures, 30s cooldown, 30s health checks.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
        }
    }

    /// Sets the failure threshold.
    #[inline]
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the cooldown.
    #[inline]
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets the health-check period.
    #[inline]
    #[must_use]
    pub const fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// CacheConfig
// ============================================================================

/// Per-operation response cache lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// `list_tabs`, `query_tabs`, `get_active_tabs`.
    pub list_ttl: Duration,
    /// `get_words`.
    pub words_ttl: Duration,
    /// `get_text`, `get_html`.
    pub content_ttl: Duration,
    /// `get_browser`.
    pub browser_ttl: Duration,
    /// Period of the expired-entry sweep.
    pub sweep_interval: Duration,
}

impl CacheConfig {
    /// Creates the default lifetimes: lists 10s, words 5min.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            list_ttl: Duration::from_secs(10),
            words_ttl: Duration::from_secs(300),
            content_ttl: Duration::from_secs(60),
            browser_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }

    /// Disables caching entirely.
    #[inline]
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            list_ttl: Duration::ZERO,
            words_ttl: Duration::ZERO,
            content_ttl: Duration::ZERO,
            browser_ttl: Duration::ZERO,
            sweep_interval: Duration::from_secs(60),
        }
    }

    /// Lifetime for a command's result, or `None` if it must not be cached.
    #[must_use]
    pub fn ttl_for(&self, command: &Command) -> Option<Duration> {
        let ttl = match command {
            Command::ListTabs | Command::QueryTabs { .. } | Command::GetActiveTabs => {
                self.list_ttl
            }
            Command::GetWords(_) => self.words_ttl,
            Command::GetText(_) | Command::GetHtml(_) => self.content_ttl,
            Command::GetBrowser => self.browser_ttl,
            _ => return None,
        };
        (!ttl.is_zero()).then_some(ttl)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ClientConfig
// ============================================================================

/// Everything the resilient client layer needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Pool and breaker settings.
    pub pool: PoolConfig,
    /// Cache lifetimes.
    pub cache: CacheConfig,
    /// Timeout for one request to one mediator.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Creates the default configuration with a 10s request timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::new(),
            pool: PoolConfig::new(),
            cache: CacheConfig::new(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the retry policy.
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the pool settings.
    #[inline]
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the cache lifetimes.
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the per-request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
