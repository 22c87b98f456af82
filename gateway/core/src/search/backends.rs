//! Search Backend and Cache Store Seams
//!
//! The orchestrator only ever talks to [`SearchBackend`] and [`CacheStore`].
//! Two implementations ship here:
//!
//! - [`HttpSearchBackend`]: JSON-over-HTTP client for a vector or keyword
//!   search service (`POST {base}/search`, `GET {base}/health`)
//! - [`MemoryCache`]: in-process TTL cache with LRU eviction, used when no
//!   external cache is configured

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{RawHit, SearchQuery, SearchResult};
use crate::clock::{SharedClock, SystemClock};

// ============================================================================
// Errors
// ============================================================================

/// Failure of a single search tier
#[derive(Debug, Error)]
pub enum SearchBackendError {
    /// The attempt exceeded its time budget
    #[error("search backend timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, DNS failure, reset, ...
    #[error("search backend unavailable: {0}")]
    Unavailable(String),

    /// Backend answered with a non-success status
    #[error("search backend returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (truncated by the server, if at all)
        body: String,
    },

    /// Response body could not be decoded
    #[error("invalid search backend response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SearchBackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// A search tier (vector similarity or keyword)
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Run a query
    async fn query(&self, query: &SearchQuery) -> Result<Vec<RawHit>, SearchBackendError>;

    /// Lightweight liveness probe
    async fn health_check(&self) -> bool;
}

/// Result cache
///
/// Every method is best effort; the orchestrator logs and ignores errors.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a cached result set
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<SearchResult>>>;

    /// Store a result set for `ttl`
    async fn put(&self, key: &str, results: Vec<SearchResult>, ttl: Duration) -> anyhow::Result<()>;

    /// Check that the cache is reachable
    async fn ping(&self) -> bool;
}

// ============================================================================
// HTTP Search Backend
// ============================================================================

#[derive(Serialize)]
struct SearchRequestBody<'a> {
    query: &'a str,
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'a str>,
}

#[derive(Deserialize)]
struct SearchResponseBody {
    results: Vec<RawHit>,
}

/// JSON-over-HTTP search client
#[derive(Clone, Debug)]
pub struct HttpSearchBackend {
    name: String,
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpSearchBackend {
    /// Create a client for the service at `base_url`
    ///
    /// No client-level timeout is set; the orchestrator bounds each attempt.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.base_url)
    }

    fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, query: &SearchQuery) -> Result<Vec<RawHit>, SearchBackendError> {
        let body = SearchRequestBody {
            query: &query.text,
            top_k: query.top_k,
            scope: query.scope.as_deref(),
        };

        let response = self
            .http_client
            .post(self.search_url())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchBackendError::Status { status, body });
        }

        let parsed: SearchResponseBody = response.json().await?;
        Ok(parsed.results)
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.health_url())
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}

// ============================================================================
// In-memory Cache
// ============================================================================

/// Default number of cached queries
pub const DEFAULT_CACHE_ENTRIES: usize = 1024;

#[derive(Clone, Debug)]
struct CacheEntry {
    results: Vec<SearchResult>,
    expires_at: Instant,
    last_accessed: Instant,
}

/// In-process TTL cache with LRU eviction
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    clock: SharedClock,
}

impl MemoryCache {
    /// Create a cache holding at most `max_entries` queries
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, SystemClock::shared())
    }

    /// Create a cache reading time from `clock`
    #[must_use]
    pub fn with_clock(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Shared handle with default capacity
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new(DEFAULT_CACHE_ENTRIES))
    }

    /// Number of stored entries (including not yet purged expired ones)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn evict_lru(&self) -> Option<String> {
        let lru_key = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().last_accessed)
            .map(|entry| entry.key().clone());

        if let Some(ref key) = lru_key {
            self.entries.remove(key);
        }
        lru_key
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_ENTRIES)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<SearchResult>>> {
        let now = self.clock.now();
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };

        if entry.expires_at <= now {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }

        entry.last_accessed = now;
        Ok(Some(entry.results.clone()))
    }

    async fn put(&self, key: &str, results: Vec<SearchResult>, ttl: Duration) -> anyhow::Result<()> {
        let now = self.clock.now();

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.purge_expired(now);
            while self.entries.len() >= self.max_entries {
                if self.evict_lru().is_none() {
                    break;
                }
            }
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                results,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::search::types::SearchSource;

    fn results(id: &str) -> Vec<SearchResult> {
        vec![SearchResult::from_hit(
            RawHit::new(id, "content", 0.8),
            SearchSource::Vector,
        )]
    }

    #[tokio::test]
    async fn test_memory_cache_roundtrip_and_expiry() {
        let clock = ManualClock::shared();
        let cache = MemoryCache::with_clock(8, clock.clone());

        cache
            .put("k", results("a"), Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().unwrap()[0].id, "a");

        clock.advance(Duration::from_secs(301));
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_memory_cache_evicts_least_recently_used() {
        let clock = ManualClock::shared();
        let cache = MemoryCache::with_clock(2, clock.clone());
        let ttl = Duration::from_secs(300);

        cache.put("a", results("a"), ttl).await.unwrap();
        clock.advance(Duration::from_millis(1));
        cache.put("b", results("b"), ttl).await.unwrap();
        clock.advance(Duration::from_millis(1));

        // Touch "a" so "b" becomes the LRU entry
        cache.get("a").await.unwrap();
        clock.advance(Duration::from_millis(1));
        cache.put("c", results("c"), ttl).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").await.unwrap().is_some());
        assert!(cache.get("b").await.unwrap().is_none());
        assert!(cache.get("c").await.unwrap().is_some());
    }

    #[test]
    fn test_http_backend_urls() {
        let backend = HttpSearchBackend::new("vector", "http://qdrant-proxy:6333/");
        assert_eq!(backend.search_url(), "http://qdrant-proxy:6333/search");
        assert_eq!(backend.health_url(), "http://qdrant-proxy:6333/health");
        assert_eq!(backend.name(), "vector");
    }

    #[test]
    fn test_request_body_omits_missing_scope() {
        let body = SearchRequestBody {
            query: "jwt",
            top_k: 3,
            scope: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("scope").is_none());
        assert_eq!(json["top_k"], 3);
    }
}
