//! Layered error taxonomy. Every variant is classified retryable or not;
//! retryability is the sole gate the orchestrator uses to decide whether to
//! re-enter `Running`.

use thiserror::Error;

/// Top-level error surfaced to callers of the orchestrator.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("tenant quota exceeded for {tenant_id}/{resource}")]
    QuotaExceeded { tenant_id: String, resource: String },

    #[error("rate limited for key {key}")]
    RateLimited { key: String },

    #[error("circuit open for {key}")]
    CircuitOpen { key: String },

    #[error("model not found: {model_id}")]
    ModelNotFound { model_id: String },

    #[error("no compatible provider for model {model_id}")]
    NoCompatibleProvider { model_id: String },

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("cancelled")]
    Cancelled,

    #[error("runner busy")]
    Busy,

    #[error("request timed out")]
    Timeout,

    #[error("provider error from {provider_id}: {message}")]
    Provider {
        provider_id: String,
        message: String,
        retryable: bool,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the orchestrator may retry this error.
    pub fn retryable(&self) -> bool {
        match self {
            EngineError::Validation(_) => false,
            EngineError::Authorization(_) => false,
            EngineError::QuotaExceeded { .. } => false,
            EngineError::RateLimited { .. } => true,
            EngineError::CircuitOpen { .. } => true,
            EngineError::ModelNotFound { .. } => false,
            EngineError::NoCompatibleProvider { .. } => false,
            EngineError::DecodeFailed(_) => false,
            EngineError::Transient(_) => true,
            EngineError::Cancelled => false,
            EngineError::Busy => true,
            EngineError::Timeout => true,
            EngineError::Provider { retryable, .. } => *retryable,
            EngineError::Internal(_) => false,
        }
    }

    /// Classify a free-form lower-cased message into a `Transient` error when
    /// it matches one of the recognized substrings, else `Internal`.
    pub fn classify_transient(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        const MARKERS: &[&str] = &[
            "connect",
            "reset",
            "timeout",
            "unavailable",
            "refused",
            "broken pipe",
            "service unavailable",
            "gateway timeout",
            "too busy",
        ];
        if MARKERS.iter().any(|m| lower.contains(m)) {
            EngineError::Transient(message)
        } else {
            EngineError::Internal(message)
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Authorization(_) => "AUTH_PERMISSION_DENIED",
            EngineError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            EngineError::RateLimited { .. } => "RATE_LIMITED",
            EngineError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            EngineError::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            EngineError::NoCompatibleProvider { .. } => "ROUTING_NO_COMPATIBLE_PROVIDER",
            EngineError::DecodeFailed(_) => "RUNTIME_INFERENCE_FAILED",
            EngineError::Transient(_) => "RUNTIME_INFERENCE_FAILED",
            EngineError::Cancelled => "RUNTIME_INVALID_STATE",
            EngineError::Busy => "ALL_RUNNERS_FAILED",
            EngineError::Timeout => "RUNTIME_INFERENCE_FAILED",
            EngineError::Provider { .. } => "ALL_RUNNERS_FAILED",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
