pub mod adapters;
pub mod chat_template;
pub mod config;
pub mod error;
pub mod providers;
pub mod reliability;
pub mod router;
pub mod runtime;
pub mod session;
pub mod types;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use providers::GgufProvider;
pub use router::{ModelRegistry, Provider, ProviderRegistry};
pub use runtime::Orchestrator;
pub use session::SessionManager;
pub use types::{InferenceRequest, InferenceResponse, SamplingParams};
