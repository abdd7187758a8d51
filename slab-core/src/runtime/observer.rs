//! Observer bus: fan-out of lifecycle events to metrics/tracing
//! sinks. Every call is synchronous on the execution thread; observers MUST
//! be non-blocking and side-effect-safe, and a failure inside one MUST NOT
//! propagate.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::EngineError;
use crate::types::ExecutionToken;

/// Implementors receive every lifecycle callback for a request. Default
/// methods are no-ops so an observer can subscribe to only what it needs.
pub trait Observer: Send + Sync {
    fn on_start(&self, _ctx: &ExecutionToken) {}
    fn on_phase(&self, _phase: &str, _ctx: &ExecutionToken) {}
    fn on_plugin_execute(&self, _plugin_id: &str, _ctx: &ExecutionToken) {}
    fn on_provider_invoke(&self, _provider_id: &str, _ctx: &ExecutionToken) {}
    fn on_success(&self, _ctx: &ExecutionToken) {}
    fn on_failure(&self, _err: &EngineError, _ctx: &ExecutionToken) {}
}

#[derive(Default)]
pub struct ObserverBus {
    observers: Vec<Box<dyn Observer>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    fn dispatch(&self, f: impl Fn(&dyn Observer)) {
        for observer in &self.observers {
            // A panicking observer must not take down the request it is
            // observing.
            let _ = catch_unwind(AssertUnwindSafe(|| f(observer.as_ref())));
        }
    }

    pub fn start(&self, ctx: &ExecutionToken) {
        self.dispatch(|o| o.on_start(ctx));
    }

    pub fn phase(&self, phase: &str, ctx: &ExecutionToken) {
        self.dispatch(|o| o.on_phase(phase, ctx));
    }

    pub fn plugin_execute(&self, plugin_id: &str, ctx: &ExecutionToken) {
        self.dispatch(|o| o.on_plugin_execute(plugin_id, ctx));
    }

    pub fn provider_invoke(&self, provider_id: &str, ctx: &ExecutionToken) {
        self.dispatch(|o| o.on_provider_invoke(provider_id, ctx));
    }

    pub fn success(&self, ctx: &ExecutionToken) {
        self.dispatch(|o| o.on_success(ctx));
    }

    pub fn failure(&self, err: &EngineError, ctx: &ExecutionToken) {
        self.dispatch(|o| o.on_failure(err, ctx));
    }
}

/// Emits `tracing` events for every lifecycle callback.
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_start(&self, ctx: &ExecutionToken) {
        tracing::info!(request_id = %ctx.request_id, "request started");
    }
    fn on_phase(&self, phase: &str, ctx: &ExecutionToken) {
        tracing::debug!(request_id = %ctx.request_id, phase, "phase entered");
    }
    fn on_plugin_execute(&self, plugin_id: &str, ctx: &ExecutionToken) {
        tracing::debug!(request_id = %ctx.request_id, plugin_id, "plugin executed");
    }
    fn on_provider_invoke(&self, provider_id: &str, ctx: &ExecutionToken) {
        tracing::debug!(request_id = %ctx.request_id, provider_id, "invoking provider");
    }
    fn on_success(&self, ctx: &ExecutionToken) {
        tracing::info!(request_id = %ctx.request_id, attempt = ctx.attempt, "request succeeded");
    }
    fn on_failure(&self, err: &EngineError, ctx: &ExecutionToken) {
        tracing::warn!(request_id = %ctx.request_id, attempt = ctx.attempt, error = %err, "request failed");
    }
}

/// Emits `metrics` counters/histograms, grounded on the
/// `model_inference.duration_seconds` / `model_inference.total`
/// instrumentation pattern used by instrumented model wrappers elsewhere in
/// this ecosystem.
pub struct MetricsObserver;

impl Observer for MetricsObserver {
    fn on_success(&self, _ctx: &ExecutionToken) {
        metrics::counter!("slab.requests.total", "status" => "success").increment(1);
    }
    fn on_failure(&self, err: &EngineError, _ctx: &ExecutionToken) {
        metrics::counter!(
            "slab.requests.total",
            "status" => "failure",
            "error_code" => err.error_code()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting(Arc<AtomicUsize>);
    impl Observer for Counting {
        fn on_success(&self, _ctx: &ExecutionToken) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;
    impl Observer for Panicking {
        fn on_success(&self, _ctx: &ExecutionToken) {
            panic!("boom");
        }
    }

    #[test]
    fn failing_observer_does_not_block_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut bus = ObserverBus::new();
        bus.register(Box::new(Panicking));
        bus.register(Box::new(Counting(count.clone())));
        let ctx = ExecutionToken::new("r1".to_string());
        bus.success(&ctx);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
