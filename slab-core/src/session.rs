//! Session Manager: a concurrent mapping from `(tenantId, modelId)` to
//! a `Session`, with idle eviction and a concurrency cap. Grounded on the
//! worker-pinned session bookkeeping used by this codebase's GGUF engine
//! adapter, generalized from "one session per worker" to "one session per
//! tenant+model pair, any number of in-flight requests up to the runner's
//! own admission bound".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::error::EngineError;
use crate::router::Provider;

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct SessionKey {
    pub tenant_id: String,
    pub model_id: String,
}

struct SessionEntry {
    provider: Arc<dyn Provider>,
    last_used: Instant,
    in_flight: u32,
}

/// Owns its native resources exclusively; released only when idle and the
/// manager decides to evict.
pub struct SessionManager {
    config: SessionConfig,
    sessions: Mutex<HashMap<SessionKey, SessionEntry>>,
}

/// Handle returned by [`SessionManager::acquire`]. Does not release on
/// drop: the caller must keep the [`SessionKey`] it acquired with and pass
/// it to [`SessionManager::release`] in every exit path, or the session's
/// in-flight count never comes back down.
pub struct SessionGuard {
    pub provider: Arc<dyn Provider>,
    key: SessionKey,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Get or construct the session for `key`, bumping last-used and
    /// incrementing in-flight. `construct` is called only on a cache miss.
    pub async fn acquire<F>(
        &self,
        key: SessionKey,
        construct: F,
    ) -> Result<SessionGuard, EngineError>
    where
        F: FnOnce() -> Arc<dyn Provider>,
    {
        let mut sessions = self.sessions.lock().await;

        if let Some(entry) = sessions.get_mut(&key) {
            entry.last_used = Instant::now();
            entry.in_flight += 1;
            return Ok(SessionGuard {
                provider: entry.provider.clone(),
                key,
            });
        }

        if sessions.len() >= self.config.max_sessions {
            let evictable = sessions
                .iter()
                .filter(|(_, e)| e.in_flight == 0)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());

            match evictable {
                Some(victim) => {
                    sessions.remove(&victim);
                }
                None => return Err(EngineError::Busy),
            }
        }

        let provider = construct();
        sessions.insert(
            key.clone(),
            SessionEntry {
                provider: provider.clone(),
                last_used: Instant::now(),
                in_flight: 1,
            },
        );
        Ok(SessionGuard { provider, key })
    }

    /// Decrements in-flight and updates last-used for `key`.
    pub async fn release(&self, key: &SessionKey) {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get_mut(key) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
            entry.last_used = Instant::now();
        }
    }

    /// Evicts sessions idle longer than `sessionTtl` with zero in-flight
    /// requests. Intended to be driven by a background sweep task.
    pub async fn sweep_idle(&self) {
        let ttl = self.config.session_ttl;
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, entry| entry.in_flight > 0 || entry.last_used.elapsed() < ttl);
    }

    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Spawns a background task that periodically calls
/// [`SessionManager::sweep_idle`] until the returned handle is dropped.
pub fn spawn_sweeper(manager: Arc<SessionManager>) -> tokio::task::JoinHandle<()> {
    let interval = manager.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            manager.sweep_idle().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ModelRegistry;
    use crate::types::{Capabilities, Health, InferenceRequest, InferenceResponse, ModelManifest};
    use async_trait::async_trait;

    struct StubProvider(&'static str);

    #[async_trait]
    impl Provider for StubProvider {
        fn id(&self) -> &str {
            self.0
        }
        fn name(&self) -> &str {
            self.0
        }
        fn version(&self) -> &str {
            "0"
        }
        fn metadata(&self) -> HashMap<String, serde_json::Value> {
            HashMap::new()
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
        async fn supports(&self, _model_id: &str, _request: &InferenceRequest) -> bool {
            true
        }
        async fn infer(
            &self,
            _request: &InferenceRequest,
            _manifest: &ModelManifest,
        ) -> Result<InferenceResponse, EngineError> {
            unimplemented!()
        }
        async fn infer_stream(
            &self,
            _request: &InferenceRequest,
            _manifest: &ModelManifest,
        ) -> Result<tokio::sync::mpsc::Receiver<crate::types::StreamChunk>, EngineError> {
            unimplemented!()
        }
        async fn health(&self) -> Health {
            Health::Healthy
        }
    }
    // silence unused import warning when ModelRegistry isn't exercised directly
    #[allow(dead_code)]
    fn _assert_trait_object(_: &dyn ModelRegistry) {}

    fn key(t: &str, m: &str) -> SessionKey {
        SessionKey {
            tenant_id: t.to_string(),
            model_id: m.to_string(),
        }
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_sessions() {
        let mgr = SessionManager::new(SessionConfig {
            max_sessions: 2,
            ..Default::default()
        });
        let a = mgr
            .acquire(key("t1", "m1"), || Arc::new(StubProvider("a")))
            .await
            .unwrap();
        let b = mgr
            .acquire(key("t2", "m1"), || Arc::new(StubProvider("b")))
            .await
            .unwrap();
        assert_eq!(a.provider.id(), "a");
        assert_eq!(b.provider.id(), "b");
        assert_eq!(mgr.session_count().await, 2);
    }

    #[tokio::test]
    async fn busy_when_capacity_reached_and_nothing_evictable() {
        let mgr = SessionManager::new(SessionConfig {
            max_sessions: 1,
            ..Default::default()
        });
        let _a = mgr
            .acquire(key("t1", "m1"), || Arc::new(StubProvider("a")))
            .await
            .unwrap();
        let result = mgr.acquire(key("t2", "m1"), || Arc::new(StubProvider("b"))).await;
        assert!(matches!(result, Err(EngineError::Busy)));
    }

    #[tokio::test]
    async fn evicts_idle_session_when_capacity_reached() {
        let mgr = SessionManager::new(SessionConfig {
            max_sessions: 1,
            ..Default::default()
        });
        let a = mgr
            .acquire(key("t1", "m1"), || Arc::new(StubProvider("a")))
            .await
            .unwrap();
        mgr.release(&a.key).await;
        drop(a);
        let b = mgr
            .acquire(key("t2", "m1"), || Arc::new(StubProvider("b")))
            .await
            .unwrap();
        assert_eq!(b.provider.id(), "b");
        assert_eq!(mgr.session_count().await, 1);
    }
}
