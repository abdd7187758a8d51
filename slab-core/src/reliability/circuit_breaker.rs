//! Per-key circuit breaker: Closed / Open / HalfOpen failure
//! isolation. Grounded on the state-transition shape used by model-inference
//! wrappers elsewhere in this codebase's provider layer, generalized to one
//! breaker instance per `(tenantId, model|provider)` key.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_probes_in_flight: u32,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: State::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_probes_in_flight: 0,
        }
    }
}

/// Per-key circuit breaker registry. Only calls that actually execute the
/// wrapped operation count toward failure/success.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    keys: Mutex<HashMap<String, Inner>>,
}

/// An admitted call must report its outcome via [`Admission::record`].
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    key: String,
    is_probe: bool,
}

impl Admission<'_> {
    pub fn record(self, success: bool) {
        self.breaker.complete(&self.key, self.is_probe, success);
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Attempt to admit a call for `key`. Returns `CircuitOpen` if the
    /// breaker is open and the open-duration has not yet elapsed, or if a
    /// half-open probe is already in flight.
    pub fn admit(&self, key: &str) -> Result<Admission<'_>, EngineError> {
        let mut keys = self.keys.lock().unwrap();
        let inner = keys.entry(key.to_string()).or_insert_with(Inner::new);

        match inner.state {
            State::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or_default();
                if elapsed >= self.config.open_duration {
                    inner.state = State::HalfOpen;
                    inner.half_open_probes_in_flight = 0;
                } else {
                    return Err(EngineError::CircuitOpen {
                        key: key.to_string(),
                    });
                }
            }
            State::HalfOpen => {
                if inner.half_open_probes_in_flight >= self.config.half_open_probes {
                    return Err(EngineError::CircuitOpen {
                        key: key.to_string(),
                    });
                }
            }
            State::Closed => {}
        }

        let is_probe = inner.state == State::HalfOpen;
        if is_probe {
            inner.half_open_probes_in_flight += 1;
        }

        Ok(Admission {
            breaker: self,
            key: key.to_string(),
            is_probe,
        })
    }

    fn complete(&self, key: &str, is_probe: bool, success: bool) {
        let mut keys = self.keys.lock().unwrap();
        let inner = keys.entry(key.to_string()).or_insert_with(Inner::new);

        if is_probe {
            inner.half_open_probes_in_flight = inner.half_open_probes_in_flight.saturating_sub(1);
        }

        if success {
            if is_probe || inner.state == State::Closed {
                inner.state = State::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
            }
        } else {
            inner.consecutive_failures += 1;
            if is_probe || inner.consecutive_failures >= self.config.failure_threshold {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    /// Run `f` through the breaker for `key`, recording success/failure based
    /// on whether it returned `Ok`.
    pub async fn call<F, Fut, T>(&self, key: &str, f: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, EngineError>>,
    {
        let admission = self.admit(key)?;
        let result = f().await;
        admission.record(result.is_ok());
        result
    }
}
