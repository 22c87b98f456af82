//! LLM Backend Integration
//!
//! Abstracted access to inference backends through a common trait. The
//! scheduler holds one primary and one fallback implementation.
//!
//! # Usage
//!
//! ```ignore
//! use gateway_core::backend::{OllamaBackend, LlmBackend, LlmRequest};
//!
//! let backend = OllamaBackend::new("localhost", 11434, "phi3");
//! let response = backend.send(&LlmRequest::new("Hello!")).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::{OllamaBackend, DEFAULT_OLLAMA_MODEL};
pub use traits::{BackendConfig, LlmBackend, LlmRequest, LlmResponse, StreamingToken};
