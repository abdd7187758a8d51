//! Orchestrator: the pipeline that turns an `InferenceRequest` into an
//! `InferenceResponse` — admission (quota, rate), routing, breaker-wrapped
//! execution, and retry with backoff — driving the execution state machine
//! end to end.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::timeout;

use super::observer::ObserverBus;
use super::state_machine::transition;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::reliability::{CircuitBreaker, QuotaAccountant, TokenBucketLimiter};
use crate::router::ProviderRegistry;
use crate::session::{SessionKey, SessionManager};
use crate::types::{ExecutionToken, InferenceRequest, InferenceResponse, RoutingContext, Signal};

pub struct Orchestrator {
    config: EngineConfig,
    pub registry: Arc<ProviderRegistry>,
    rate_limiter: TokenBucketLimiter,
    breaker: CircuitBreaker,
    quota: QuotaAccountant,
    session_manager: Arc<SessionManager>,
    pub observers: ObserverBus,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        registry: Arc<ProviderRegistry>,
        session_manager: Arc<SessionManager>,
    ) -> Self {
        Self {
            rate_limiter: TokenBucketLimiter::new(config.token_bucket.clone()),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            quota: QuotaAccountant::unbounded(),
            observers: ObserverBus::new(),
            session_manager,
            config,
            registry,
        }
    }

    pub fn with_quota(mut self, quota: QuotaAccountant) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_observers(mut self, observers: ObserverBus) -> Self {
        self.observers = observers;
        self
    }

    /// Asks the provider backing `request_id` to stop generating. Returns
    /// whether any provider recognized the id; the in-flight `infer` call
    /// surfaces `EngineError::Cancelled` on its own once the provider notices.
    pub async fn cancel(&self, request_id: &str) -> bool {
        self.registry.cancel(request_id).await
    }

    fn tenant_id(request: &InferenceRequest) -> String {
        request
            .tenant_hint
            .clone()
            .unwrap_or_else(|| "default".to_string())
    }

    fn advance(
        &self,
        token: &mut ExecutionToken,
        signal: Signal,
        phase: &'static str,
    ) -> Result<(), EngineError> {
        match transition(token.status, signal) {
            Some(next) => {
                token.status = next;
                token.current_phase = phase;
                Ok(())
            }
            None => Err(EngineError::Internal(format!(
                "illegal transition {:?} + {:?}",
                token.status, signal
            ))),
        }
    }

    /// `infer` wrapped in `sync.timeout` (default 5 minutes, overridable per
    /// request); expiry surfaces a retryable `Timeout`.
    pub async fn infer_sync(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, EngineError> {
        let sync_timeout = request.timeout.unwrap_or(self.config.sync_timeout);
        match timeout(sync_timeout, self.infer(request)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        }
    }

    pub async fn infer(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, EngineError> {
        let tenant_id = Self::tenant_id(&request);
        let mut token = ExecutionToken::new(request.request_id.clone());

        self.advance(&mut token, Signal::Start, "running")?;
        self.observers.start(&token);

        let ctx = RoutingContext {
            tenant_id: tenant_id.clone(),
            preferred_provider: request.preferred_provider.clone(),
            device_hint: None,
            timeout: request.timeout,
            cost_sensitive: false,
            priority: request.priority,
            wants_stream: request.streaming,
        };

        // Quota is checked before rate: a tenant that is over quota never
        // burns a rate-limit token for the rejected request.
        if !self.quota.check_and_increment(&tenant_id, "requests", 1) {
            let err = EngineError::QuotaExceeded {
                tenant_id: tenant_id.clone(),
                resource: "requests".to_string(),
            };
            self.observers.failure(&err, &token);
            return Err(err);
        }

        if !self.rate_limiter.try_acquire(&tenant_id) {
            let err = EngineError::RateLimited { key: tenant_id };
            self.observers.failure(&err, &token);
            return Err(err);
        }

        self.observers.phase("routing", &token);
        let mut decision = match self.registry.select(&request, &ctx).await {
            Ok(decision) => decision,
            Err(err) => {
                self.observers.failure(&err, &token);
                return Err(err);
            }
        };

        let session_key = SessionKey {
            tenant_id: tenant_id.clone(),
            model_id: request.model.clone(),
        };

        loop {
            let provider_id = decision.provider_id.clone();
            self.observers.provider_invoke(&provider_id, &token);

            let provider =
                self.registry
                    .provider(&provider_id)
                    .ok_or_else(|| EngineError::NoCompatibleProvider {
                        model_id: request.model.clone(),
                    })?;

            let manifest = decision.manifest.clone();
            let start = Instant::now();

            // The session's cached provider only changes when a new session
            // is constructed (on a cache miss or after eviction):
            // `SessionManager::acquire` never reconstructs a warm entry, so
            // a mid-retry fallback switch takes effect for future sessions
            // rather than rebinding one already in flight.
            let result: Result<InferenceResponse, EngineError> = match self
                .session_manager
                .acquire(session_key.clone(), || provider.clone())
                .await
            {
                Ok(guard) => {
                    let breaker_key = format!("{tenant_id}:{}", guard.provider.id());
                    let outcome = self
                        .breaker
                        .call(&breaker_key, || guard.provider.infer(&request, &manifest))
                        .await;
                    self.session_manager.release(&session_key).await;
                    outcome
                }
                Err(err) => Err(err),
            };

            match result {
                Ok(mut response) => {
                    response.duration_ms = start.elapsed().as_millis() as u64;
                    self.advance(&mut token, Signal::ExecutionSuccess, "completed")?;
                    self.quota
                        .record_usage(&provider_id, response.tokens_used() as u64);
                    token.response = Some(response.clone());
                    self.observers.success(&token);
                    return Ok(response);
                }
                Err(EngineError::Cancelled) => {
                    self.observers.failure(&EngineError::Cancelled, &token);
                    self.advance(&mut token, Signal::Cancel, "failed")?;
                    return Err(EngineError::Cancelled);
                }
                Err(err) => {
                    self.observers.failure(&err, &token);
                    self.advance(&mut token, Signal::PhaseFailure, "retrying")?;
                    token.attempt += 1;

                    let retryable = err.retryable();
                    let can_retry = retryable && token.attempt < self.config.retry.max_attempts;
                    if !can_retry {
                        self.advance(&mut token, Signal::RetryExhausted, "failed")?;
                        return Err(err);
                    }

                    // On the second retry, switch to the first fallback
                    // provider from the original routing decision, if any.
                    if token.attempt == 2 {
                        if let Some(fallback) = decision.fallback_providers.first().cloned() {
                            tracing::info!(
                                request_id = %token.request_id,
                                from = %decision.provider_id,
                                to = %fallback,
                                "switching to fallback provider on second retry"
                            );
                            decision.provider_id = fallback;
                        }
                    }

                    let backoff = self.config.retry.backoff_for(token.attempt);
                    tokio::time::sleep(backoff).await;
                    self.advance(&mut token, Signal::Start, "running")?;
                }
            }
        }
    }
}
