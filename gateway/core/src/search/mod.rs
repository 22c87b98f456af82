//! Resilient Search
//!
//! Vector search with keyword and cache fallbacks, gated by a health monitor
//! that stops attempting a primary known to be down.
//!
//! # Usage
//!
//! ```ignore
//! use gateway_core::search::*;
//!
//! let vector = Arc::new(HttpSearchBackend::new("vector", "http://localhost:8081"));
//! let keyword = Arc::new(HttpSearchBackend::new("keyword", "http://localhost:8082"));
//! let health = HealthMonitor::new(vector.clone(), HealthConfig::default());
//! let probe = HealthProbeTask::spawn(health.clone());
//!
//! let search = FallbackSearch::new(vector, keyword, MemoryCache::shared(), health, SearchConfig::default());
//! let response = search.search_response(&SearchQuery::new("jwt refresh", 10)).await;
//! ```

mod backends;
mod health;
mod orchestrator;
mod types;

pub use backends::{
    CacheStore, HttpSearchBackend, MemoryCache, SearchBackend, SearchBackendError,
    DEFAULT_CACHE_ENTRIES,
};
pub use health::{HealthConfig, HealthMonitor, HealthProbeTask, HealthStatus};
pub use orchestrator::{FallbackSearch, SearchConfig, SearchStatus};
pub use types::{RawHit, SearchQuery, SearchResponse, SearchResult, SearchSource};
