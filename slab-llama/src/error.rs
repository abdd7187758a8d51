use thiserror::Error;

/// Errors raised by the model/context/sampler/runner layers.
#[derive(Debug, Clone, Error)]
pub enum LlamaError {
    #[error("failed to load model: {0}")]
    ModelLoadFailed(String),

    #[error("failed to create context")]
    ContextCreateFailed,

    #[error("tokenization failed: {0}")]
    TokenizeFailed(String),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("batch is full, cannot add more tokens")]
    BatchFull,

    #[error("context window exhausted at {n_ctx} tokens")]
    ContextExhausted { n_ctx: usize },

    #[error("sampler error: {0}")]
    SamplerError(String),

    #[error("generation cancelled")]
    Cancelled,

    #[error("runner worker channel closed")]
    WorkerGone,
}
