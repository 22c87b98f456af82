//! LLM Backend Traits
//!
//! Trait definitions for inference backends. The scheduler treats the primary
//! (hosted, rate limited) model and the local fallback model through the same
//! interface, so either side can be swapped without touching routing logic.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Token stream events from LLM backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A chunk of the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (may differ from concatenated tokens)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// A single inference request
#[derive(Clone, Debug)]
pub struct LlmRequest {
    /// The prompt to send
    pub prompt: String,
    /// Model identifier; empty means "backend default"
    pub model: String,
    /// Maximum tokens in response (0 = default)
    pub max_tokens: u32,
    /// Temperature (0.0-1.0)
    pub temperature: f32,
    /// System prompt (optional, prepended to the prompt)
    pub system: Option<String>,
    /// Retrieved context (optional, placed before the prompt)
    pub context: Option<String>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: String::new(),
            max_tokens: 0,
            temperature: 0.7,
            system: None,
            context: None,
        }
    }
}

impl LlmRequest {
    /// Create a request for the backend's default model
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set context
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Short prompt prefix for log lines
    #[must_use]
    pub fn preview(&self) -> &str {
        match self.prompt.char_indices().nth(50) {
            Some((idx, _)) => &self.prompt[..idx],
            None => &self.prompt,
        }
    }
}

/// Response from a non-streaming request
#[derive(Clone, Debug)]
pub struct LlmResponse {
    /// The response text
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Tokens used (if available)
    pub tokens_used: Option<u32>,
    /// Generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// LLM backend trait
///
/// Implement this trait to plug a provider in as either the primary or the
/// fallback model.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend name for logs (e.g., "ollama/phi3@localhost:11434")
    fn name(&self) -> &str;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Send a request and get a streaming response
    ///
    /// The channel is closed when the response is complete or an error occurs.
    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;

    /// Send a request and wait for the complete response
    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse>;
}

/// Connection settings for an Ollama-compatible inference server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Model used when a request does not name one
    pub model: String,
    /// Whole-request HTTP timeout
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            model: "phi3".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl BackendConfig {
    /// Create Ollama configuration
    pub fn ollama(host: impl Into<String>, port: u16, model: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            model: model.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_request_builder() {
        let request = LlmRequest::new("Hello")
            .with_model("phi3")
            .with_temperature(1.5)
            .with_system("You are helpful")
            .with_max_tokens(100);

        assert_eq!(request.prompt, "Hello");
        assert_eq!(request.model, "phi3");
        assert!((request.temperature - 1.0).abs() < f32::EPSILON);
        assert_eq!(request.system, Some("You are helpful".to_string()));
        assert_eq!(request.max_tokens, 100);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(80);
        let request = LlmRequest::new(long);
        assert_eq!(request.preview().chars().count(), 50);

        let short = LlmRequest::new("explain this code");
        assert_eq!(short.preview(), "explain this code");
    }

    #[test]
    fn test_backend_config_default() {
        let config = BackendConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 11434);
        assert_eq!(config.model, "phi3");

        let remote = BackendConfig::ollama("gpu-box", 8080, "llama3.1:70b");
        assert_eq!(remote.timeout, Duration::from_secs(120));
    }
}
