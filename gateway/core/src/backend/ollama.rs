//! Ollama Backend Implementation
//!
//! Inference client for an Ollama server. Typically used as the local
//! fallback model (e.g. `phi3`), but works as a primary as well.
//!
//! # Ollama API
//!
//! - `/api/generate` - completions, streamed as newline-delimited JSON
//! - `/api/tags` - model listing, used here as a cheap liveness probe

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::traits::{BackendConfig, LlmBackend, LlmRequest, LlmResponse, StreamingToken};

/// Default model when neither the request nor the config names one
pub const DEFAULT_OLLAMA_MODEL: &str = "phi3";

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Log name, `ollama/<model>@<host>:<port>`
    name: String,
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// Model used when the request leaves `model` empty
    default_model: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl std::fmt::Debug for OllamaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaBackend")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(host: impl Into<String>, port: u16, default_model: impl Into<String>) -> Self {
        Self::with_timeout(host, port, default_model, Duration::from_secs(120))
    }

    /// Create a backend with a custom whole-request HTTP timeout
    pub fn with_timeout(
        host: impl Into<String>,
        port: u16,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let host = host.into();
        let default_model = default_model.into();
        Self {
            name: format!("ollama/{default_model}@{host}:{port}"),
            host,
            port,
            default_model,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Create a backend from connection settings
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::with_timeout(&config.host, config.port, &config.model, config.timeout)
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    fn model_for<'a>(&'a self, request: &'a LlmRequest) -> &'a str {
        if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        }
    }

    /// Build the full prompt including system and context
    fn build_prompt(request: &LlmRequest) -> String {
        let mut full_prompt = String::new();

        if let Some(ref system) = request.system {
            full_prompt.push_str(system);
            full_prompt.push_str("\n\n");
        }

        if let Some(ref context) = request.context {
            full_prompt.push_str(context);
            full_prompt.push('\n');
        }

        full_prompt.push_str(&request.prompt);
        full_prompt
    }

    /// JSON body for `/api/generate`
    fn build_body(&self, request: &LlmRequest, stream: bool) -> serde_json::Value {
        let mut options = serde_json::Map::new();
        if (request.temperature - 0.7).abs() > f32::EPSILON {
            options.insert("temperature".to_string(), request.temperature.into());
        }
        if request.max_tokens > 0 {
            options.insert("num_predict".to_string(), request.max_tokens.into());
        }

        let mut body = serde_json::json!({
            "model": self.model_for(request),
            "prompt": Self::build_prompt(request),
            "stream": stream,
        });
        if !options.is_empty() {
            body["options"] = serde_json::Value::Object(options);
        }
        body
    }

    async fn post_generate(
        &self,
        request: &LlmRequest,
        stream: bool,
    ) -> anyhow::Result<reqwest::Response> {
        let response = self
            .http_client
            .post(self.generate_url())
            .json(&self.build_body(request, stream))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }
        Ok(response)
    }
}

/// One parsed NDJSON line from a streaming generate call
#[derive(Debug, PartialEq, Eq)]
struct GenerateChunk {
    token: Option<String>,
    done: bool,
}

/// Splits a response body into complete NDJSON lines
///
/// Bytes stay raw until their line is complete, so a multi-byte character
/// split across network chunks is decoded whole.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes and parse every line they complete
    fn push(&mut self, bytes: &[u8]) -> Vec<GenerateChunk> {
        self.pending.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            chunks.extend(parse_chunk(&line));
        }
        chunks
    }

    /// Parse a trailing line the server sent without a newline
    fn finish(&mut self) -> Option<GenerateChunk> {
        let line = std::mem::take(&mut self.pending);
        parse_chunk(&line)
    }
}

fn parse_chunk(line: &[u8]) -> Option<GenerateChunk> {
    let data: serde_json::Value = serde_json::from_slice(line).ok()?;
    Some(GenerateChunk {
        token: data
            .get("response")
            .and_then(|r| r.as_str())
            .map(String::from),
        done: data
            .get("done")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
    })
}

/// Send one parsed line to the caller; `false` once the stream is over
async fn forward_chunk(
    tx: &mpsc::Sender<StreamingToken>,
    chunk: GenerateChunk,
    full_response: &mut String,
) -> bool {
    if let Some(token) = chunk.token.filter(|t| !t.is_empty()) {
        full_response.push_str(&token);
        if tx.send(StreamingToken::Token(token)).await.is_err() {
            // Receiver dropped
            return false;
        }
    }

    if chunk.done {
        let _ = tx
            .send(StreamingToken::Complete {
                message: std::mem::take(full_response),
            })
            .await;
        return false;
    }
    true
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let response = self.post_generate(request, true).await?;
        let mut stream = response.bytes_stream();
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let mut lines = LineBuffer::default();
            let mut full_response = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                };
                for chunk in lines.push(&bytes) {
                    if !forward_chunk(&tx, chunk, &mut full_response).await {
                        return;
                    }
                }
            }

            if let Some(chunk) = lines.finish() {
                if !forward_chunk(&tx, chunk, &mut full_response).await {
                    return;
                }
            }

            // Stream ended without done signal
            if !full_response.is_empty() {
                let _ = tx
                    .send(StreamingToken::Complete {
                        message: full_response,
                    })
                    .await;
            }
        });

        Ok(rx)
    }

    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        let start = Instant::now();
        let data: serde_json::Value = self.post_generate(request, false).await?.json().await?;

        let content = data
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();

        let tokens_used = data
            .get("eval_count")
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u32::try_from(c).ok());

        Ok(LlmResponse {
            content,
            model: self.model_for(request).to_string(),
            tokens_used,
            duration_ms: Some(start.elapsed().as_millis() as u64),
        })
    }
}
