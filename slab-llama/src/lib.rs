//! A pure-Rust, dependency-free-of-FFI re-implementation of the decode-loop
//! primitives a GGUF-style runtime needs: tokenization, a KV-cache-pinned
//! context, a sampler chain, and a worker that turns a prompt into generated
//! tokens. Binding to a real `llama.cpp` shared library is out of scope;
//! [`model::Model`] is the seam a real binding would implement.

mod batch;
mod context;
mod error;
mod grammar;
mod model;
mod runner;
mod sampler;
mod token;

pub use batch::Batch;
pub use context::{Context, ContextParams};
pub use error::LlamaError;
pub use grammar::Grammar;
pub use model::{InMemoryModel, Model};
pub use runner::{CancelToken, GenerationRequest, GenerationResult, Runner, RunnerConfig};
pub use sampler::{GenerationParams, SamplerChain};
pub use token::{Pos, SeqId, Token};
