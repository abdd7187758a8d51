//! Provider Registry & Router. Scores compatible providers and
//! produces a routing decision with fallbacks.

mod cache;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::types::{
    ArtifactFormat, Capabilities, Health, InferenceRequest, InferenceResponse, ModelManifest,
    RoutingContext, RoutingDecision, StreamChunk,
};

pub use cache::RouteCache;

/// Provider contract, consumed by the router.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn metadata(&self) -> HashMap<String, serde_json::Value>;
    fn capabilities(&self) -> Capabilities;
    async fn supports(&self, model_id: &str, request: &InferenceRequest) -> bool;
    async fn infer(
        &self,
        request: &InferenceRequest,
        manifest: &ModelManifest,
    ) -> Result<InferenceResponse, EngineError>;
    async fn infer_stream(
        &self,
        request: &InferenceRequest,
        manifest: &ModelManifest,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>, EngineError>;
    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }
    async fn shutdown(&self) -> Result<(), EngineError> {
        Ok(())
    }
    async fn health(&self) -> Health {
        Health::Healthy
    }
    /// Cancel a request still in flight at this provider. Returns whether
    /// the request was found here; providers with no native cancellation
    /// leave the default no-op.
    async fn cancel(&self, _request_id: &str) -> bool {
        false
    }
}

/// Registry contract, an out-of-scope collaborator whose interface only
/// matters here.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn find_manifest(
        &self,
        model_id: &str,
        tenant_id: &str,
        version: &str,
    ) -> Option<ModelManifest>;
}

/// Process-wide registry of providers, owned by the orchestrator entrypoint.
/// Lifecycle is init-at-startup, shutdown-on-exit: no hidden singletons
/// inside components.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    model_registry: Option<Arc<dyn ModelRegistry>>,
    cache: RouteCache,
}

impl ProviderRegistry {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            providers: HashMap::new(),
            model_registry: None,
            cache: RouteCache::new(cache_capacity),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn set_model_registry(&mut self, registry: Arc<dyn ModelRegistry>) {
        self.model_registry = Some(registry);
    }

    pub async fn shutdown(&self) {
        for provider in self.providers.values() {
            let _ = provider.shutdown().await;
        }
    }

    pub fn provider(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    /// Asks every registered provider to cancel `request_id`. At most one
    /// should recognize it, but providers are independent so all are asked.
    pub async fn cancel(&self, request_id: &str) -> bool {
        let mut cancelled = false;
        for provider in self.providers.values() {
            if provider.cancel(request_id).await {
                cancelled = true;
            }
        }
        cancelled
    }

    async fn resolve_manifest(
        &self,
        request: &InferenceRequest,
        ctx: &RoutingContext,
    ) -> Option<ModelManifest> {
        if let Some(registry) = &self.model_registry {
            if let Some(m) = registry
                .find_manifest(&request.model, &ctx.tenant_id, "latest")
                .await
            {
                return Some(m);
            }
        }
        let path = request.model_path()?;
        ModelManifest::synthesize_from_path(&request.model, &ctx.tenant_id, path)
    }

    /// Score and select a provider for `request`.
    pub async fn select(
        &self,
        request: &InferenceRequest,
        ctx: &RoutingContext,
    ) -> Result<RoutingDecision, EngineError> {
        let manifest = self
            .resolve_manifest(request, ctx)
            .await
            .ok_or_else(|| EngineError::ModelNotFound {
                model_id: request.model.clone(),
            })?;

        let artifact_formats: Vec<ArtifactFormat> = manifest.artifacts.keys().copied().collect();

        let mut scored: Vec<(String, i64)> = Vec::new();

        for provider in self.providers.values() {
            // Pin: preferredProvider short-circuits everything else.
            if let Some(pref) = &ctx.preferred_provider {
                if provider.id() == pref {
                    scored.push((provider.id().to_string(), 10_000));
                    continue;
                }
            }

            let caps = provider.capabilities();

            // Filter: supportedFormats ∩ manifest.artifacts, empty = generic.
            let format_ok = caps.supported_formats.is_empty()
                || artifact_formats.is_empty()
                || caps
                    .supported_formats
                    .iter()
                    .any(|f| artifact_formats.contains(f));
            if !format_ok {
                continue;
            }

            if !provider.supports(&request.model, request).await {
                continue;
            }

            let mut score: i64 = 50;
            if ctx.wants_stream && caps.streaming {
                score += 20;
            } else if ctx.wants_stream && !caps.streaming {
                score -= 15;
            }
            if ctx.cost_sensitive && caps.supported_devices.contains(&crate::types::Device::Cpu) {
                score += 10;
            }
            if let Some(hint) = ctx.device_hint {
                if caps.supported_devices.contains(&hint) {
                    score += 30;
                }
            }
            if let Some(pref) = &ctx.preferred_provider {
                if provider.id() == pref {
                    score += 1000;
                } else {
                    score -= 100;
                }
            }

            scored.push((provider.id().to_string(), score));
        }

        scored.sort_by(|a, b| b.1.cmp(&a.1));

        if scored.is_empty() {
            // GGUF-family fallback at score 40.
            if let Some((id, _)) = self
                .providers
                .iter()
                .find(|(id, _)| id.contains("gguf") || id.contains("llama"))
            {
                scored.push((id.clone(), 40));
            } else {
                return Err(EngineError::NoCompatibleProvider {
                    model_id: request.model.clone(),
                });
            }
        }

        let (winner_id, winner_score) = scored[0].clone();
        let fallback_providers = scored
            .iter()
            .skip(1)
            .take(2)
            .map(|(id, _)| id.clone())
            .collect();

        let decision = RoutingDecision {
            provider_id: winner_id,
            score: winner_score,
            fallback_providers,
            manifest,
        };

        self.cache.put(request.request_id.clone(), decision.clone());
        Ok(decision)
    }

    pub fn cached_decision(&self, request_id: &str) -> Option<RoutingDecision> {
        self.cache.get(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InferenceRequest, SamplingParams};

    struct StubProvider {
        id: &'static str,
        caps: Capabilities,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            self.id
        }
        fn version(&self) -> &str {
            "0"
        }
        fn metadata(&self) -> HashMap<String, serde_json::Value> {
            HashMap::new()
        }
        fn capabilities(&self) -> Capabilities {
            self.caps.clone()
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
        ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>, EngineError> {
            unimplemented!()
        }
    }

    fn request() -> InferenceRequest {
        let mut parameters = SamplingParams::default();
        parameters.extra.insert(
            "model_path".to_string(),
            serde_json::json!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml")),
        );
        InferenceRequest {
            request_id: "r1".to_string(),
            model: "m".to_string(),
            messages: vec![],
            tools: None,
            parameters,
            streaming: false,
            timeout: None,
            priority: 0,
            preferred_provider: None,
            api_key: None,
            tenant_hint: None,
        }
    }

    fn ctx(preferred: Option<&str>) -> RoutingContext {
        RoutingContext {
            tenant_id: "t".to_string(),
            preferred_provider: preferred.map(str::to_string),
            device_hint: None,
            timeout: None,
            cost_sensitive: false,
            priority: 0,
            wants_stream: false,
        }
    }

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new(100);
        for id in ["openai", "gguf", "litert"] {
            registry.register(Arc::new(StubProvider {
                id,
                caps: Capabilities::default(),
            }));
        }
        registry
    }

    #[tokio::test]
    async fn preferred_provider_is_pinned_and_excluded_from_its_own_fallbacks() {
        let registry = registry();
        let decision = registry
            .select(&request(), &ctx(Some("gguf")))
            .await
            .unwrap();
        assert_eq!(decision.provider_id, "gguf");
        assert!(!decision.fallback_providers.contains(&"gguf".to_string()));
    }

    #[tokio::test]
    async fn selection_is_idempotent_for_a_stable_registry() {
        let registry = registry();
        let a = registry.select(&request(), &ctx(None)).await.unwrap();
        let b = registry.select(&request(), &ctx(None)).await.unwrap();
        assert_eq!(a.provider_id, b.provider_id);
        assert_eq!(a.score, b.score);
    }

    #[tokio::test]
    async fn falls_back_to_gguf_family_when_nothing_scores() {
        let mut registry = ProviderRegistry::new(10);
        registry.register(Arc::new(StubProvider {
            id: "local-gguf-runner",
            caps: Capabilities {
                supported_formats: vec![ArtifactFormat::Onnx],
                ..Capabilities::default()
            },
        }));

        registry.set_model_registry(Arc::new(FixedManifestRegistry));

        let decision = registry.select(&request(), &ctx(None)).await.unwrap();
        assert_eq!(decision.provider_id, "local-gguf-runner");
        assert_eq!(decision.score, 40);
    }

    struct FixedManifestRegistry;
    #[async_trait]
    impl ModelRegistry for FixedManifestRegistry {
        async fn find_manifest(
            &self,
            model_id: &str,
            tenant_id: &str,
            _version: &str,
        ) -> Option<ModelManifest> {
            let mut manifest = ModelManifest::synthesize_from_path(
                model_id,
                tenant_id,
                concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"),
            )?;
            manifest.artifacts.clear();
            manifest
                .artifacts
                .insert(ArtifactFormat::Tf, "model.tf".to_string());
            Some(manifest)
        }
    }
}
