//! Search Result Types
//!
//! The uniformly shaped result list every search tier produces. Results are
//! immutable once tagged: the orchestrator stamps `source` and `degraded` and
//! nothing downstream rewrites them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which tier produced a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// Served from the result cache
    Cache,
    /// Primary vector-similarity backend
    Vector,
    /// Keyword-search fallback
    Keyword,
}

impl SearchSource {
    /// Whether results from this tier count as degraded
    #[must_use]
    pub fn is_degraded(self) -> bool {
        !matches!(self, Self::Vector)
    }
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Vector => write!(f, "vector"),
            Self::Keyword => write!(f, "keyword"),
        }
    }
}

/// A hit as returned by a backend, before tier tagging
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    /// Document/chunk identifier
    pub id: String,
    /// Content payload
    pub content: String,
    /// Relevance score (backend specific scale)
    pub score: f32,
    /// Extra backend metadata (file path, line range, ...)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RawHit {
    /// Create a hit without metadata
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score,
            metadata: HashMap::new(),
        }
    }
}

/// A tagged search result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Document/chunk identifier
    pub id: String,
    /// Content payload
    pub content: String,
    /// Relevance score
    pub score: f32,
    /// Whether this came from a fallback tier
    pub degraded: bool,
    /// Tier that produced the result
    pub source: SearchSource,
    /// Extra backend metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SearchResult {
    /// Tag a raw hit with the tier it came from
    #[must_use]
    pub fn from_hit(hit: RawHit, source: SearchSource) -> Self {
        Self {
            id: hit.id,
            content: hit.content,
            score: hit.score,
            degraded: source.is_degraded(),
            source,
            metadata: hit.metadata,
        }
    }

    /// Re-tag a result under a different tier
    ///
    /// Used when serving cached vector results: the content is unchanged but
    /// the caller must see `source=cache, degraded=true`.
    #[must_use]
    pub fn retagged(self, source: SearchSource) -> Self {
        Self {
            degraded: source.is_degraded(),
            source,
            ..self
        }
    }
}

/// Parameters of one search call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Natural language query
    pub text: String,
    /// Number of results wanted
    pub top_k: usize,
    /// Workspace isolation scope
    pub scope: Option<String>,
}

impl SearchQuery {
    /// Create an unscoped query
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            scope: None,
        }
    }

    /// Restrict to a workspace
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Cache key for this query: `search:{scope}:{query}:{top_k}`
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!(
            "search:{}:{}:{}",
            self.scope.as_deref().unwrap_or("*"),
            self.text.trim(),
            self.top_k
        )
    }
}

/// Response shape handed to the API layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Ordered results
    pub results: Vec<SearchResult>,
    /// True if any result came from a fallback tier
    pub degraded_mode: bool,
    /// True if every tier failed and `results` is empty for that reason
    #[serde(default)]
    pub backends_exhausted: bool,
}

impl SearchResponse {
    /// Wrap a result list, deriving `degraded_mode`
    #[must_use]
    pub fn new(results: Vec<SearchResult>) -> Self {
        let degraded_mode = results.iter().any(|r| r.degraded);
        Self {
            results,
            degraded_mode,
            backends_exhausted: false,
        }
    }

    /// Empty response after every tier failed
    #[must_use]
    pub fn exhausted() -> Self {
        Self {
            results: Vec::new(),
            degraded_mode: false,
            backends_exhausted: true,
        }
    }

    /// Human readable notice for degraded responses
    #[must_use]
    pub fn warning(&self) -> Option<String> {
        if self.backends_exhausted {
            return Some("No results: all search backends are degraded".to_string());
        }
        if !self.degraded_mode {
            return None;
        }
        let source = self.results.first().map_or(SearchSource::Keyword, |r| r.source);
        Some(format!("Search is degraded; serving {source} results"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_vector_is_not_degraded() {
        assert!(!SearchSource::Vector.is_degraded());
        assert!(SearchSource::Keyword.is_degraded());
        assert!(SearchSource::Cache.is_degraded());
    }

    #[test]
    fn test_retag_to_cache_marks_degraded() {
        let result = SearchResult::from_hit(RawHit::new("a", "fn main", 0.9), SearchSource::Vector);
        assert!(!result.degraded);

        let cached = result.retagged(SearchSource::Cache);
        assert!(cached.degraded);
        assert_eq!(cached.source, SearchSource::Cache);
        assert_eq!(cached.id, "a");
    }

    #[test]
    fn test_cache_key_format() {
        let q = SearchQuery::new("  jwt auth ", 5).with_scope("ws-1");
        assert_eq!(q.cache_key(), "search:ws-1:jwt auth:5");
        assert_eq!(SearchQuery::new("x", 10).cache_key(), "search:*:x:10");
    }

    #[test]
    fn test_response_degraded_mode() {
        let vector = SearchResult::from_hit(RawHit::new("a", "", 1.0), SearchSource::Vector);
        let keyword = SearchResult::from_hit(RawHit::new("b", "", 0.5), SearchSource::Keyword);

        assert!(!SearchResponse::new(vec![vector.clone()]).degraded_mode);
        assert!(SearchResponse::new(vec![vector, keyword]).degraded_mode);

        let empty = SearchResponse::new(Vec::new());
        assert!(!empty.degraded_mode);
        assert!(empty.warning().is_none());

        let exhausted = SearchResponse::exhausted();
        assert!(exhausted.results.is_empty());
        assert!(exhausted.warning().is_some());
    }

    #[test]
    fn test_source_serializes_lowercase() {
        let json = serde_json::to_string(&SearchSource::Keyword).unwrap();
        assert_eq!(json, "\"keyword\"");
    }
}
