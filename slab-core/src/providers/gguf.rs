//! A GGUF-family provider: routes through `slab_llama`'s worker-pinned
//! decode loop. This is the provider the router's family fallback is written for.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use slab_llama::{
    CancelToken, ContextParams, GenerationParams, GenerationRequest, LlamaError, Model, Runner,
    RunnerConfig,
};

use crate::chat_template;
use crate::error::EngineError;
use crate::router::Provider;
use crate::types::{
    ArtifactFormat, Capabilities, Device, Health, InferenceRequest, InferenceResponse,
    ModelManifest, SamplingParams, StreamChunk,
};

pub struct GgufProvider {
    id: String,
    model: Arc<dyn Model>,
    runner: Arc<Runner>,
    n_ctx: usize,
    /// Cancel handles for requests currently in flight, keyed by request id.
    inflight: Arc<Mutex<HashMap<String, CancelToken>>>,
}

impl GgufProvider {
    pub fn new(
        id: impl Into<String>,
        model: Arc<dyn Model>,
        ctx_params: ContextParams,
        runner_config: RunnerConfig,
    ) -> Self {
        let n_ctx = ctx_params.n_ctx;
        let runner = Runner::spawn(model.clone(), ctx_params, runner_config);
        Self {
            id: id.into(),
            model,
            runner: Arc::new(runner),
            n_ctx,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn register_cancel(&self, request_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.inflight
            .lock()
            .await
            .insert(request_id.to_string(), token.clone());
        token
    }

    async fn unregister_cancel(&self, request_id: &str) {
        self.inflight.lock().await.remove(request_id);
    }

    /// Renders the prompt and reports whether automatic BOS insertion
    /// should be suppressed during tokenization: a raw prompt override or a
    /// rendered chat template both already carry the model's own
    /// delimiters.
    fn prompt_for(&self, request: &InferenceRequest, manifest: &ModelManifest) -> (String, bool) {
        if let Some(raw) = request.raw_prompt() {
            return (raw.to_string(), false);
        }
        let rendered = chat_template::render(manifest.template.as_deref(), &request.messages);
        (rendered, true)
    }
}

#[async_trait]
impl Provider for GgufProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "gguf"
    }

    fn version(&self) -> &str {
        "0.1"
    }

    fn metadata(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            embeddings: false,
            max_context_tokens: self.n_ctx,
            supported_formats: vec![ArtifactFormat::Gguf],
            supported_devices: vec![Device::Cpu, Device::Cuda],
        }
    }

    async fn supports(&self, _model_id: &str, _request: &InferenceRequest) -> bool {
        true
    }

    async fn infer(
        &self,
        request: &InferenceRequest,
        manifest: &ModelManifest,
    ) -> Result<InferenceResponse, EngineError> {
        let (prompt, suppress_bos) = self.prompt_for(request, manifest);
        let tokens = self
            .model
            .tokenize(&prompt, !suppress_bos)
            .map_err(to_engine_error)?;
        let prompt_tokens = tokens.len();

        let cancel = self.register_cancel(&request.request_id).await;
        let result = self
            .runner
            .generate(GenerationRequest {
                prompt_tokens: tokens,
                params: to_generation_params(&request.parameters),
                max_tokens: request.parameters.max_tokens,
                stop_sequences: request.parameters.stop.clone(),
                stream: None,
                cancel: Some(cancel),
            })
            .await;
        self.unregister_cancel(&request.request_id).await;
        let result = result.map_err(to_engine_error)?;

        let content = detokenize(&self.model, &result.tokens);
        Ok(InferenceResponse {
            request_id: request.request_id.clone(),
            model: request.model.clone(),
            content,
            input_tokens: prompt_tokens,
            output_tokens: result.tokens.len(),
            duration_ms: 0,
            metadata: HashMap::new(),
        })
    }

    async fn infer_stream(
        &self,
        request: &InferenceRequest,
        manifest: &ModelManifest,
    ) -> Result<mpsc::Receiver<StreamChunk>, EngineError> {
        let (prompt, suppress_bos) = self.prompt_for(request, manifest);
        let tokens = self
            .model
            .tokenize(&prompt, !suppress_bos)
            .map_err(to_engine_error)?;

        let cancel = self.register_cancel(&request.request_id).await;
        let generation = GenerationRequest {
            prompt_tokens: tokens,
            params: to_generation_params(&request.parameters),
            max_tokens: request.parameters.max_tokens,
            stop_sequences: request.parameters.stop.clone(),
            stream: None,
            cancel: Some(cancel),
        };

        let (token_tx, mut token_rx) = mpsc::channel(32);
        let runner = self.runner.clone();
        let id_for_cleanup = request.request_id.clone();
        let inflight = self.inflight.clone();
        tokio::spawn(async move {
            let mut generation = generation;
            generation.stream = Some(token_tx);
            let _ = runner.generate(generation).await;
            inflight.lock().await.remove(&id_for_cleanup);
        });

        let (chunk_tx, chunk_rx) = mpsc::channel(32);
        let model = self.model.clone();
        let request_id = request.request_id.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            let mut sequence = 0u64;
            while let Some(token) = token_rx.recv().await {
                let delta = model.token_to_piece(token).unwrap_or_default();
                let chunk = StreamChunk {
                    request_id: request_id.clone(),
                    sequence,
                    delta,
                    is_final: false,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                };
                sequence += 1;
                if chunk_tx.send(chunk).await.is_err() {
                    return;
                }
            }
            let _ = chunk_tx
                .send(StreamChunk {
                    request_id,
                    sequence,
                    delta: String::new(),
                    is_final: true,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
                .await;
        });

        Ok(chunk_rx)
    }

    async fn health(&self) -> Health {
        Health::Healthy
    }

    async fn cancel(&self, request_id: &str) -> bool {
        match self.inflight.lock().await.get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

fn to_generation_params(params: &SamplingParams) -> GenerationParams {
    let grammar = if params.json_mode {
        Some(slab_llama::Grammar::Json)
    } else {
        params.grammar.as_deref().and_then(slab_llama::Grammar::parse)
    };
    GenerationParams {
        temperature: params.temperature,
        top_k: params.top_k,
        top_p: params.top_p,
        min_p: params.min_p,
        typical_p: params.typical_p,
        repeat_penalty: params.repeat_penalty,
        repeat_last_n: params.repeat_last_n,
        frequency_penalty: params.frequency_penalty,
        presence_penalty: params.presence_penalty,
        mirostat: params.mirostat,
        mirostat_tau: params.mirostat_tau,
        mirostat_eta: params.mirostat_eta,
        seed: params.seed,
        grammar,
    }
}

fn detokenize(model: &Arc<dyn Model>, tokens: &[slab_llama::Token]) -> String {
    tokens
        .iter()
        .filter_map(|&t| model.token_to_piece(t).ok())
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_engine_error(err: LlamaError) -> EngineError {
    match err {
        LlamaError::WorkerGone => EngineError::Busy,
        LlamaError::Cancelled => EngineError::Cancelled,
        LlamaError::ContextExhausted { .. } => EngineError::Validation(err.to_string()),
        other => EngineError::DecodeFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, Role};
    use slab_llama::InMemoryModel;

    fn request() -> InferenceRequest {
        InferenceRequest {
            request_id: "r1".to_string(),
            model: "m".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: "hello".to_string(),
            }],
            tools: None,
            parameters: SamplingParams {
                max_tokens: 4,
                seed: 3,
                ..SamplingParams::default()
            },
            streaming: false,
            timeout: None,
            priority: 0,
            preferred_provider: None,
            api_key: None,
            tenant_hint: None,
        }
    }

    fn manifest() -> ModelManifest {
        ModelManifest::synthesize_from_path(
            "m",
            "t",
            concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn infer_produces_bounded_output() {
        let provider = GgufProvider::new(
            "gguf-local",
            Arc::new(InMemoryModel::default()),
            ContextParams::default(),
            RunnerConfig::default(),
        );
        let response = provider.infer(&request(), &manifest()).await.unwrap();
        assert!(response.output_tokens <= 4);
    }

    #[tokio::test]
    async fn infer_stream_ends_with_exactly_one_final_chunk() {
        let provider = GgufProvider::new(
            "gguf-local",
            Arc::new(InMemoryModel::default()),
            ContextParams::default(),
            RunnerConfig::default(),
        );
        let mut rx = provider.infer_stream(&request(), &manifest()).await.unwrap();
        let mut finals = 0;
        while let Some(chunk) = rx.recv().await {
            if chunk.is_final {
                finals += 1;
            }
        }
        assert_eq!(finals, 1);
    }

    #[tokio::test]
    async fn infer_stream_sequences_start_at_zero_and_increase_monotonically() {
        let provider = GgufProvider::new(
            "gguf-local",
            Arc::new(InMemoryModel::default()),
            ContextParams::default(),
            RunnerConfig::default(),
        );
        let mut rx = provider.infer_stream(&request(), &manifest()).await.unwrap();
        let mut sequences = Vec::new();
        while let Some(chunk) = rx.recv().await {
            sequences.push(chunk.sequence);
        }
        assert_eq!(sequences.first().copied(), Some(0));
        for pair in sequences.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[tokio::test]
    async fn cancel_is_a_no_op_once_the_request_is_no_longer_in_flight() {
        let provider = GgufProvider::new(
            "gguf-local",
            Arc::new(InMemoryModel::default()),
            ContextParams::default(),
            RunnerConfig::default(),
        );
        provider.infer(&request(), &manifest()).await.unwrap();
        assert!(!provider.cancel(&request().request_id).await);
    }
}
