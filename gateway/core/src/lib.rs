//! Gateway Core - Resilience Layer for Search and Inference
//!
//! Sits between request handlers and two unreliable upstreams so that search
//! and chat degrade instead of failing:
//!
//! ```text
//!                       request handlers
//!                  /                        \
//!             search                    generate / stream
//!               |                              |
//!       +----------------+          +----------------------+
//!       | FallbackSearch |          | RateLimitedScheduler |
//!       +----------------+          +----------------------+
//!         |  vector  <-- HealthMonitor   |  admission window
//!         |  keyword      (probe task)   |  bounded FIFO queue
//!         |  cache                       |  primary | fallback model
//! ```
//!
//! # Key Types
//!
//! - [`FallbackSearch`]: tiered search tagging every result with its source
//! - [`HealthMonitor`] / [`HealthProbeTask`]: primary search health tracking
//! - [`RateLimitedScheduler`]: per-minute ceiling, bounded queue, fallback model
//! - [`GatewayConfig`]: TOML + environment configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use gateway_core::{load_config, RateLimitedScheduler, LlmRequest};
//!
//! let config = load_config()?;
//! config.validate()?;
//!
//! let scheduler = RateLimitedScheduler::new(primary, fallback, config.scheduler.clone());
//! scheduler.start()?;
//! let outcome = scheduler.generate(LlmRequest::new("Summarize this module")).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod clock;
pub mod config;
pub mod inference;
pub mod search;

// Re-exports for convenience
pub use backend::{
    BackendConfig, LlmBackend, LlmRequest, LlmResponse, OllamaBackend, StreamingToken,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, GatewayConfig, GatewayToml,
};
pub use inference::{
    ChatStream, FallbackReason, GenerateOutcome, RateLimitedScheduler, SchedulerConfig,
    SchedulerError, SchedulerStatus,
};
pub use search::{
    CacheStore, FallbackSearch, HealthConfig, HealthMonitor, HealthProbeTask, HealthStatus,
    HttpSearchBackend, MemoryCache, SearchBackend, SearchBackendError, SearchConfig, SearchQuery,
    SearchResponse, SearchResult, SearchSource, SearchStatus,
};
