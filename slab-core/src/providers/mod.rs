//! Concrete [`crate::router::Provider`] implementations.

pub mod gguf;

pub use gguf::GgufProvider;
