//! Process entrypoint: wires an `EngineConfig`, a `ProviderRegistry` holding a
//! single local GGUF-family provider, and an `Orchestrator`, then runs one
//! scripted demo request through `infer_sync` so the wiring is exercised on
//! every start rather than only under test.

use std::sync::Arc;

use slab_core::{EngineConfig, GgufProvider, InferenceRequest, Orchestrator, ProviderRegistry, SamplingParams};
use slab_core::router::Provider as _;
use slab_core::session::spawn_sweeper;
use slab_core::types::{Message, Role};
use slab_llama::{ContextParams, InMemoryModel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::new();

    let runner_config = slab_llama::RunnerConfig {
        n_batch: config.runner.n_batch,
        max_concurrent_requests: config.runner.max_concurrent_requests,
    };
    let provider = Arc::new(GgufProvider::new(
        "local-gguf",
        Arc::new(InMemoryModel::default()),
        ContextParams::default(),
        runner_config,
    ));
    provider.initialize().await?;

    let mut registry = ProviderRegistry::new(config.route_cache_capacity);
    registry.register(provider.clone());
    let registry = Arc::new(registry);

    let session_manager = Arc::new(slab_core::SessionManager::new(config.session.clone()));
    let _sweeper = spawn_sweeper(session_manager.clone());

    let orchestrator = Orchestrator::new(config, registry.clone(), session_manager.clone());

    let request = InferenceRequest {
        request_id: "boot-check".to_string(),
        model: "local-gguf".to_string(),
        messages: vec![Message {
            role: Role::User,
            content: "hello from slab-runtime".to_string(),
        }],
        tools: None,
        parameters: SamplingParams {
            max_tokens: 16,
            seed: 7,
            ..SamplingParams::default()
        },
        streaming: false,
        timeout: None,
        priority: 0,
        preferred_provider: Some("local-gguf".to_string()),
        api_key: None,
        tenant_hint: Some("demo-tenant".to_string()),
    };

    match orchestrator.infer_sync(request).await {
        Ok(response) => {
            tracing::info!(
                request_id = %response.request_id,
                tokens = response.output_tokens,
                "demo inference completed: {:?}",
                response.content
            );
        }
        Err(err) => {
            tracing::error!(error = %err, code = err.error_code(), "demo inference failed");
            return Err(err.into());
        }
    }

    registry.shutdown().await;
    Ok(())
}
