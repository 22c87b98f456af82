//! Shared mock backends for integration tests
//!
//! Every mock counts its calls and can be told to fail or to respond slowly,
//! so tests can assert exactly which tier or model served a request.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use gateway_core::search::RawHit;
use gateway_core::{
    CacheStore, LlmBackend, LlmRequest, LlmResponse, SearchBackend, SearchBackendError,
    SearchQuery, SearchResult, StreamingToken,
};

// =============================================================================
// Inference
// =============================================================================

/// Scriptable inference backend
pub struct MockLlm {
    name: &'static str,
    failing: AtomicBool,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            failing: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts in the order the backend received them
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    async fn begin(&self, request: &LlmRequest) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("{} is down", self.name);
        }
        Ok(())
    }
}

#[async_trait]
impl LlmBackend for MockLlm {
    fn name(&self) -> &str {
        self.name
    }

    async fn health_check(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        self.begin(request).await?;

        let (tx, rx) = mpsc::channel(16);
        let words: Vec<String> = request
            .prompt
            .split_whitespace()
            .map(|w| format!("{w} "))
            .collect();
        let message = format!("[{}] {}", self.name, request.prompt);

        tokio::spawn(async move {
            for word in words {
                if tx.send(StreamingToken::Token(word)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamingToken::Complete { message }).await;
        });
        Ok(rx)
    }

    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        self.begin(request).await?;
        Ok(LlmResponse {
            content: format!("[{}] {}", self.name, request.prompt),
            model: self.name.to_string(),
            tokens_used: Some(1),
            duration_ms: Some(0),
        })
    }
}

// =============================================================================
// Search
// =============================================================================

/// Scriptable search tier
pub struct MockSearch {
    name: &'static str,
    failing: AtomicBool,
    healthy: AtomicBool,
    latency: Mutex<Duration>,
    probe_latency: Mutex<Duration>,
    calls: AtomicUsize,
}

impl MockSearch {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            failing: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            probe_latency: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_probe_latency(&self, latency: Duration) {
        *self.probe_latency.lock() = latency;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for MockSearch {
    fn name(&self) -> &str {
        self.name
    }

    async fn query(&self, query: &SearchQuery) -> Result<Vec<RawHit>, SearchBackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SearchBackendError::Unavailable(format!(
                "{} connection refused",
                self.name
            )));
        }

        Ok((0..query.top_k)
            .map(|i| {
                RawHit::new(
                    format!("{}-{i}", self.name),
                    format!("{} match for {}", self.name, query.text),
                    1.0 - i as f32 * 0.1,
                )
            })
            .collect())
    }

    async fn health_check(&self) -> bool {
        let latency = *self.probe_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Cache whose every operation fails
pub struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<Vec<SearchResult>>> {
        anyhow::bail!("cache connection reset")
    }

    async fn put(&self, _key: &str, _results: Vec<SearchResult>, _ttl: Duration) -> anyhow::Result<()> {
        anyhow::bail!("cache connection reset")
    }

    async fn ping(&self) -> bool {
        false
    }
}

/// Poll `check` every 5ms until it holds or `within` elapses
pub async fn wait_for(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
