//! Process-wide configuration. Loading a config from a file or environment is
//! an out-of-scope external collaborator; this struct is the shape the
//! orchestrator entrypoint wires up, with sensible production defaults.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    pub capacity: u64,
    pub refill_period: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_period: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            half_open_probes: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// `min(initialBackoff * 2^attempt, maxBackoff)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self
            .initial_backoff
            .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .unwrap_or(self.max_backoff);
        scaled.min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            session_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_concurrent_requests: usize,
    pub n_batch: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            n_batch: 512,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub token_bucket: TokenBucketConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub runner: RunnerConfig,
    /// `inferSync` default timeout.
    pub sync_timeout: Duration,
    /// Route-decision cache bound.
    pub route_cache_capacity: usize,
    /// Health-cache duration gating redundant provider health probes.
    pub health_cache_duration: Duration,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            sync_timeout: Duration::from_secs(300),
            route_cache_capacity: 10_000,
            health_cache_duration: Duration::from_secs(30),
            ..Default::default()
        }
    }
}
