//! Core data model shared by every component: requests, responses, stream
//! chunks, model manifests, routing decisions and the in-flight execution
//! token.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Recognized sampling parameters with the defaults mandated by the data
/// model. Unrecognized keys land in `extra` and are never interpreted by the
/// sampler chain, only echoed back in response metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub min_p: f32,
    pub typical_p: f32,
    pub repeat_penalty: f32,
    pub repeat_last_n: i32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub mirostat: u8,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,
    /// -1 means "seed from wall clock".
    pub seed: i64,
    pub max_tokens: usize,
    pub stop: Vec<String>,
    pub grammar: Option<String>,
    pub json_mode: bool,
    /// Unrecognized keys, preserved verbatim.
    pub extra: HashMap<String, Value>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            min_p: 0.05,
            typical_p: 1.0,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            mirostat: 0,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            seed: -1,
            max_tokens: 128,
            stop: Vec::new(),
            grammar: None,
            json_mode: false,
            extra: HashMap::new(),
        }
    }
}

/// An inference request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub request_id: String,
    /// Logical model id, `name[:version]`.
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Option<Value>,
    pub parameters: SamplingParams,
    pub streaming: bool,
    pub timeout: Option<std::time::Duration>,
    /// 0-9.
    pub priority: u8,
    pub preferred_provider: Option<String>,
    pub api_key: Option<String>,
    pub tenant_hint: Option<String>,
}

impl InferenceRequest {
    /// The raw prompt override at `parameters.extra["prompt"]`, used when
    /// `messages` is empty.
    pub fn raw_prompt(&self) -> Option<&str> {
        self.parameters.extra.get("prompt").and_then(Value::as_str)
    }

    /// `parameters.extra["model_path"]`, used for direct-path manifest
    /// synthesis.
    pub fn model_path(&self) -> Option<&str> {
        self.parameters
            .extra
            .get("model_path")
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub request_id: String,
    pub model: String,
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
    pub metadata: HashMap<String, Value>,
}

impl InferenceResponse {
    pub fn tokens_used(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// One delta of a streaming response. Invariant: exactly one `final=true`
/// chunk terminates a successful stream and no delta follows it.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub request_id: String,
    pub sequence: u64,
    pub delta: String,
    pub is_final: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactFormat {
    Gguf,
    Tflite,
    Onnx,
    Tf,
    Pt,
    Jax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda,
    Rocm,
    Tpu,
    Npu,
}

#[derive(Debug, Clone)]
pub struct ModelManifest {
    pub model_id: String,
    /// `"latest"` is a reserved alias.
    pub version: String,
    pub tenant_id: String,
    pub artifacts: HashMap<ArtifactFormat, String>,
    pub supported_devices: Vec<Device>,
    pub resource_requirements: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Model-specific chat template source (Jinja-style). `None` falls back
    /// to the ChatML default.
    pub template: Option<String>,
}

impl ModelManifest {
    /// Synthesize a manifest for a direct filesystem path, only valid
    /// when the file exists and is a regular file.
    pub fn synthesize_from_path(model_id: &str, tenant_id: &str, path: &str) -> Option<Self> {
        let p = Path::new(path);
        if !p.is_file() {
            return None;
        }
        let now = Utc::now();
        let mut artifacts = HashMap::new();
        artifacts.insert(ArtifactFormat::Gguf, path.to_string());
        Some(Self {
            model_id: model_id.to_string(),
            version: "latest".to_string(),
            tenant_id: tenant_id.to_string(),
            artifacts,
            supported_devices: vec![Device::Cpu],
            resource_requirements: HashMap::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
            template: None,
        })
    }
}

/// Inputs to the provider router.
#[derive(Debug, Clone)]
pub struct RoutingContext {
    pub tenant_id: String,
    pub preferred_provider: Option<String>,
    pub device_hint: Option<Device>,
    pub timeout: Option<std::time::Duration>,
    pub cost_sensitive: bool,
    pub priority: u8,
    pub wants_stream: bool,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub provider_id: String,
    pub score: i64,
    /// At most 2, in descending-score order.
    pub fallback_providers: Vec<String>,
    pub manifest: ModelManifest,
}

/// States of the execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Created,
    Running,
    Retrying,
    Completed,
    Failed,
}

/// Signals that drive state-machine transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Start,
    ExecutionSuccess,
    PhaseFailure,
    RetryExhausted,
    Cancel,
}

/// Owned exclusively by one in-flight orchestration; never shared.
#[derive(Debug, Clone)]
pub struct ExecutionToken {
    pub request_id: String,
    pub current_phase: &'static str,
    pub status: ExecutionState,
    /// 0-based, monotonically non-decreasing.
    pub attempt: u32,
    pub response: Option<InferenceResponse>,
}

impl ExecutionToken {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            current_phase: "created",
            status: ExecutionState::Created,
            attempt: 0,
            response: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Health {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub streaming: bool,
    pub embeddings: bool,
    pub max_context_tokens: usize,
    pub supported_formats: Vec<ArtifactFormat>,
    pub supported_devices: Vec<Device>,
}
