//! Fallback Search Orchestrator
//!
//! Answers every search with the best tier that responds in time:
//!
//! ```text
//!   query
//!     |
//!     v
//!  primary available? --no--+
//!     | yes                 |
//!     v                     |
//!  [vector] --fail/timeout--+
//!     | ok                  v
//!     |                [keyword] --fail/timeout--+
//!     |                     | ok                 v
//!     |                     |               [cache] --miss/fail--> []
//!     v                     v                    v
//!  source=vector       source=keyword       source=cache
//!  degraded=false      degraded=true        degraded=true
//! ```
//!
//! Vector successes are written to the cache in the background. Each call is
//! independent; the only shared state is the health monitor.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backends::{CacheStore, SearchBackend};
use super::health::HealthMonitor;
use super::types::{SearchQuery, SearchResponse, SearchResult, SearchSource};

// ============================================================================
// Configuration
// ============================================================================

/// Per-tier time budgets and cache policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchConfig {
    /// Budget for the vector backend
    pub primary_timeout: Duration,
    /// Budget for the keyword backend
    pub keyword_timeout: Duration,
    /// Budget for cache reads and writes
    pub cache_timeout: Duration,
    /// TTL for cached vector results
    pub cache_ttl: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            primary_timeout: Duration::from_secs(2),
            keyword_timeout: Duration::from_secs(3),
            cache_timeout: Duration::from_millis(500),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl SearchConfig {
    /// Set the vector budget
    #[must_use]
    pub fn with_primary_timeout(mut self, timeout: Duration) -> Self {
        self.primary_timeout = timeout;
        self
    }

    /// Set the keyword budget
    #[must_use]
    pub fn with_keyword_timeout(mut self, timeout: Duration) -> Self {
        self.keyword_timeout = timeout;
        self
    }

    /// Set the cache budget
    #[must_use]
    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    /// Set the cache TTL
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

// ============================================================================
// Status
// ============================================================================

/// Search subsystem status report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStatus {
    /// Whether the vector backend is being attempted
    pub primary_available: bool,
    /// Consecutive vector failures
    pub consecutive_failures: u32,
    /// Seconds since the last probe or recorded outcome
    pub last_checked_secs_ago: Option<u64>,
    /// Whether the cache answered a ping
    pub cache_available: bool,
    /// Keyword fallback is always configured
    pub fallback_enabled: bool,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Tiered search with health-aware fallback
#[derive(Clone)]
pub struct FallbackSearch {
    vector: Arc<dyn SearchBackend>,
    keyword: Arc<dyn SearchBackend>,
    cache: Arc<dyn CacheStore>,
    health: HealthMonitor,
    config: SearchConfig,
}

impl std::fmt::Debug for FallbackSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackSearch")
            .field("vector", &self.vector.name())
            .field("keyword", &self.keyword.name())
            .field("health", &self.health)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FallbackSearch {
    /// Assemble the tiers
    ///
    /// `health` should monitor the same backend passed as `vector`.
    pub fn new(
        vector: Arc<dyn SearchBackend>,
        keyword: Arc<dyn SearchBackend>,
        cache: Arc<dyn CacheStore>,
        health: HealthMonitor,
        config: SearchConfig,
    ) -> Self {
        Self {
            vector,
            keyword,
            cache,
            health,
            config,
        }
    }

    /// Health monitor shared with the background probe
    #[must_use]
    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Tier configuration
    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search and return the tagged results
    ///
    /// An empty list means either no matches or every tier failed; use
    /// [`Self::search_response`] to tell the two apart.
    pub async fn search(&self, query: &SearchQuery) -> Vec<SearchResult> {
        self.search_response(query).await.results
    }

    /// Search and return the API response shape
    pub async fn search_response(&self, query: &SearchQuery) -> SearchResponse {
        if self.health.is_available() {
            if let Some(results) = self.try_vector(query).await {
                return SearchResponse::new(results);
            }
        } else {
            tracing::debug!(query = %preview(&query.text), "Primary search unavailable, skipping");
        }

        if let Some(results) = self.try_keyword(query).await {
            return SearchResponse::new(results);
        }

        if let Some(results) = self.try_cache(query).await {
            return SearchResponse::new(results);
        }

        tracing::warn!(query = %preview(&query.text), "All search tiers failed");
        SearchResponse::exhausted()
    }

    /// Current status, including a best-effort cache ping
    pub async fn status(&self) -> SearchStatus {
        let health = self.health.status();
        let cache_available = tokio::time::timeout(self.config.cache_timeout, self.cache.ping())
            .await
            .unwrap_or(false);

        SearchStatus {
            primary_available: health.available,
            consecutive_failures: health.consecutive_failures,
            last_checked_secs_ago: self.health.last_checked_elapsed().map(|d| d.as_secs()),
            cache_available,
            fallback_enabled: true,
        }
    }

    async fn try_vector(&self, query: &SearchQuery) -> Option<Vec<SearchResult>> {
        match tokio::time::timeout(self.config.primary_timeout, self.vector.query(query)).await {
            Ok(Ok(hits)) => {
                self.health.record_success();
                let results: Vec<SearchResult> = hits
                    .into_iter()
                    .map(|hit| SearchResult::from_hit(hit, SearchSource::Vector))
                    .collect();
                self.spawn_cache_write(query.cache_key(), results.clone());
                Some(results)
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = self.vector.name(), error = %e, "Vector search failed");
                self.health.record_failure();
                None
            }
            Err(_) => {
                tracing::warn!(
                    backend = self.vector.name(),
                    timeout_ms = self.config.primary_timeout.as_millis() as u64,
                    "Vector search timed out"
                );
                self.health.record_failure();
                None
            }
        }
    }

    async fn try_keyword(&self, query: &SearchQuery) -> Option<Vec<SearchResult>> {
        match tokio::time::timeout(self.config.keyword_timeout, self.keyword.query(query)).await {
            Ok(Ok(hits)) => {
                tracing::info!(
                    query = %preview(&query.text),
                    results = hits.len(),
                    "Serving keyword fallback results"
                );
                Some(
                    hits.into_iter()
                        .map(|hit| SearchResult::from_hit(hit, SearchSource::Keyword))
                        .collect(),
                )
            }
            Ok(Err(e)) => {
                tracing::warn!(backend = self.keyword.name(), error = %e, "Keyword search failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    backend = self.keyword.name(),
                    timeout_ms = self.config.keyword_timeout.as_millis() as u64,
                    "Keyword search timed out"
                );
                None
            }
        }
    }

    async fn try_cache(&self, query: &SearchQuery) -> Option<Vec<SearchResult>> {
        let key = query.cache_key();
        match tokio::time::timeout(self.config.cache_timeout, self.cache.get(&key)).await {
            // An empty cached list is treated as a miss
            Ok(Ok(Some(results))) if !results.is_empty() => {
                tracing::info!(key = %key, results = results.len(), "Serving cached search results");
                Some(
                    results
                        .into_iter()
                        .map(|r| r.retagged(SearchSource::Cache))
                        .collect(),
                )
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Cache read failed");
                None
            }
            Err(_) => {
                tracing::warn!("Cache read timed out");
                None
            }
        }
    }

    fn spawn_cache_write(&self, key: String, results: Vec<SearchResult>) {
        if results.is_empty() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let ttl = self.config.cache_ttl;
        let budget = self.config.cache_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(budget, cache.put(&key, results, ttl)).await {
                Ok(Ok(())) => tracing::trace!(key = %key, "Cached search results"),
                Ok(Err(e)) => tracing::warn!(key = %key, error = %e, "Cache write failed"),
                Err(_) => tracing::warn!(key = %key, "Cache write timed out"),
            }
        });
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(50) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
