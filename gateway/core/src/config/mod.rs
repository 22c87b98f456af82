//! TOML Configuration File Support
//!
//! Centralized configuration loading for the gateway, from a TOML file at
//! `~/.config/devmind/gateway.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the daemon through [`ConfigOverrides`])
//! 2. Environment variables (`GATEWAY_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! listen_addr = "127.0.0.1:8787"
//!
//! [search]
//! primary_timeout_ms = 2000
//! keyword_timeout_ms = 3000
//! cache_timeout_ms = 500
//! cache_ttl_secs = 300
//! cache_max_entries = 1024
//!
//! [health]
//! check_interval_secs = 30
//! probe_timeout_ms = 5000
//! failure_threshold = 3
//!
//! [inference]
//! max_requests_per_minute = 60
//! max_queue_size = 100
//! queue_timeout_secs = 30
//! primary_timeout_secs = 60
//!
//! [backends]
//! vector_url = "http://localhost:8081"
//! keyword_url = "http://localhost:8082"
//! primary_host = "inference.internal"
//! primary_port = 11434
//! primary_model = "llama3.1:70b"
//! fallback_host = "localhost"
//! fallback_port = 11434
//! fallback_model = "phi3"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendConfig;
use crate::inference::SchedulerConfig;
use crate::search::{HealthConfig, SearchConfig, DEFAULT_CACHE_ENTRIES};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Address the HTTP server binds to
    pub listen_addr: Option<String>,
}

/// Search section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchToml {
    /// Vector search budget in milliseconds
    pub primary_timeout_ms: Option<u64>,

    /// Keyword search budget in milliseconds
    pub keyword_timeout_ms: Option<u64>,

    /// Cache read/write budget in milliseconds
    pub cache_timeout_ms: Option<u64>,

    /// TTL for cached results in seconds
    pub cache_ttl_secs: Option<u64>,

    /// Maximum cached queries (in-memory cache)
    pub cache_max_entries: Option<usize>,
}

/// Health section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthToml {
    /// Probe interval in seconds
    pub check_interval_secs: Option<u64>,

    /// Probe budget in milliseconds
    pub probe_timeout_ms: Option<u64>,

    /// Consecutive failures before the primary is skipped
    pub failure_threshold: Option<u32>,
}

/// Inference section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceToml {
    /// Primary model requests allowed per minute
    pub max_requests_per_minute: Option<u32>,

    /// Maximum waiting requests
    pub max_queue_size: Option<usize>,

    /// Maximum queue wait in seconds
    pub queue_timeout_secs: Option<u64>,

    /// Primary model budget in seconds
    pub primary_timeout_secs: Option<u64>,
}

/// Backends section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsToml {
    /// Vector search service base URL
    pub vector_url: Option<String>,

    /// Keyword search service base URL
    pub keyword_url: Option<String>,

    /// Primary inference host
    pub primary_host: Option<String>,

    /// Primary inference port
    pub primary_port: Option<u16>,

    /// Primary model name
    pub primary_model: Option<String>,

    /// Fallback inference host
    pub fallback_host: Option<String>,

    /// Fallback inference port
    pub fallback_port: Option<u16>,

    /// Fallback model name
    pub fallback_model: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayToml {
    /// Server configuration section
    pub server: ServerToml,

    /// Search configuration section
    pub search: SearchToml,

    /// Health monitoring configuration section
    pub health: HealthToml,

    /// Inference scheduling configuration section
    pub inference: InferenceToml,

    /// Backend endpoints configuration section
    pub backends: BackendsToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the gateway
///
/// Use [`load_config`] to load configuration with proper priority handling,
/// then [`GatewayConfig::validate`] before building anything from it.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// HTTP listen address
    pub listen_addr: String,

    /// Search tier budgets and cache policy
    pub search: SearchConfig,

    /// Maximum cached queries
    pub cache_max_entries: usize,

    /// Health monitoring
    pub health: HealthConfig,

    /// Inference scheduling
    pub scheduler: SchedulerConfig,

    /// Vector search service base URL
    pub vector_url: String,

    /// Keyword search service base URL
    pub keyword_url: String,

    /// Rate-limited primary model
    pub primary: BackendConfig,

    /// Local fallback model
    pub fallback: BackendConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8787".to_string(),
            search: SearchConfig::default(),
            cache_max_entries: DEFAULT_CACHE_ENTRIES,
            health: HealthConfig::default(),
            scheduler: SchedulerConfig::default(),
            vector_url: "http://localhost:8081".to_string(),
            keyword_url: "http://localhost:8082".to_string(),
            primary: BackendConfig::ollama("localhost", 11434, "llama3.1"),
            fallback: BackendConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Reject values that would make the gateway misbehave at runtime
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("inference.queue_timeout_secs", self.scheduler.queue_timeout),
            ("inference.primary_timeout_secs", self.scheduler.primary_timeout),
            ("health.check_interval_secs", self.health.check_interval),
            ("health.probe_timeout_ms", self.health.probe_timeout),
            ("search.primary_timeout_ms", self.search.primary_timeout),
            ("search.keyword_timeout_ms", self.search.keyword_timeout),
            ("search.cache_timeout_ms", self.search.cache_timeout),
            ("search.cache_ttl_secs", self.search.cache_ttl),
        ];
        for (name, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self.health.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::ValidationError(
                "search.cache_max_entries must be at least 1".to_string(),
            ));
        }
        for (name, url) in [
            ("backends.vector_url", &self.vector_url),
            ("backends.keyword_url", &self.keyword_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be an http(s) URL, got {url:?}"
                )));
            }
        }

        if self.scheduler.max_requests_per_minute == 0 {
            tracing::warn!("max_requests_per_minute is 0; every chat request will use the fallback model");
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/devmind/gateway.toml` or
/// `~/.config/devmind/gateway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("devmind").join("gateway.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// If `path` is `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: GatewayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut GatewayConfig, toml: &GatewayToml) {
    if let Some(ref addr) = toml.server.listen_addr {
        config.listen_addr = addr.clone();
    }

    // Search
    if let Some(ms) = toml.search.primary_timeout_ms {
        config.search.primary_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.search.keyword_timeout_ms {
        config.search.keyword_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.search.cache_timeout_ms {
        config.search.cache_timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = toml.search.cache_ttl_secs {
        config.search.cache_ttl = Duration::from_secs(secs);
    }
    if let Some(entries) = toml.search.cache_max_entries {
        config.cache_max_entries = entries;
    }

    // Health
    if let Some(secs) = toml.health.check_interval_secs {
        config.health.check_interval = Duration::from_secs(secs);
    }
    if let Some(ms) = toml.health.probe_timeout_ms {
        config.health.probe_timeout = Duration::from_millis(ms);
    }
    if let Some(threshold) = toml.health.failure_threshold {
        config.health.failure_threshold = threshold;
    }

    // Inference
    if let Some(rpm) = toml.inference.max_requests_per_minute {
        config.scheduler.max_requests_per_minute = rpm;
    }
    if let Some(size) = toml.inference.max_queue_size {
        config.scheduler.max_queue_size = size;
    }
    if let Some(secs) = toml.inference.queue_timeout_secs {
        config.scheduler.queue_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.inference.primary_timeout_secs {
        config.scheduler.primary_timeout = Duration::from_secs(secs);
    }

    // Backends
    let backends = &toml.backends;
    if let Some(ref url) = backends.vector_url {
        config.vector_url = url.clone();
    }
    if let Some(ref url) = backends.keyword_url {
        config.keyword_url = url.clone();
    }
    if let Some(ref host) = backends.primary_host {
        config.primary.host = host.clone();
    }
    if let Some(port) = backends.primary_port {
        config.primary.port = port;
    }
    if let Some(ref model) = backends.primary_model {
        config.primary.model = model.clone();
    }
    if let Some(ref host) = backends.fallback_host {
        config.fallback.host = host.clone();
    }
    if let Some(port) = backends.fallback_port {
        config.fallback.port = port;
    }
    if let Some(ref model) = backends.fallback_model {
        config.fallback.model = model.clone();
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut GatewayConfig) {
    if let Ok(addr) = std::env::var("GATEWAY_LISTEN") {
        config.listen_addr = addr;
        config.source = ConfigSource::Env;
    }

    // Inference settings from environment
    if let Ok(rpm) = std::env::var("GATEWAY_MAX_RPM") {
        if let Ok(n) = rpm.parse::<u32>() {
            config.scheduler.max_requests_per_minute = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(size) = std::env::var("GATEWAY_MAX_QUEUE_SIZE") {
        if let Ok(n) = size.parse::<usize>() {
            config.scheduler.max_queue_size = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(timeout) = std::env::var("GATEWAY_QUEUE_TIMEOUT") {
        if let Ok(secs) = timeout.parse::<u64>() {
            config.scheduler.queue_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }

    // Search and health settings from environment
    if let Ok(interval) = std::env::var("GATEWAY_HEALTH_INTERVAL") {
        if let Ok(secs) = interval.parse::<u64>() {
            config.health.check_interval = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(timeout) = std::env::var("GATEWAY_SEARCH_TIMEOUT_PRIMARY") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.search.primary_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(timeout) = std::env::var("GATEWAY_SEARCH_TIMEOUT_KEYWORD") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.search.keyword_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(ttl) = std::env::var("GATEWAY_CACHE_TTL") {
        if let Ok(secs) = ttl.parse::<u64>() {
            config.search.cache_ttl = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }

    // Backend endpoints from environment
    if let Ok(url) = std::env::var("GATEWAY_VECTOR_URL") {
        config.vector_url = url;
        config.source = ConfigSource::Env;
    }
    if let Ok(url) = std::env::var("GATEWAY_KEYWORD_URL") {
        config.keyword_url = url;
        config.source = ConfigSource::Env;
    }
    if let Ok(model) = std::env::var("GATEWAY_PRIMARY_MODEL") {
        config.primary.model = model;
        config.source = ConfigSource::Env;
    }
    if let Ok(model) = std::env::var("GATEWAY_FALLBACK_MODEL") {
        config.fallback.model = model;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub listen_addr: Option<String>,

    /// Requests per minute override
    pub max_requests_per_minute: Option<u32>,

    /// Queue capacity override
    pub max_queue_size: Option<usize>,

    /// Vector service URL override
    pub vector_url: Option<String>,

    /// Keyword service URL override
    pub keyword_url: Option<String>,

    /// Primary model override
    pub primary_model: Option<String>,

    /// Fallback model override
    pub fallback_model: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_listen_addr(mut self, addr: String) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    /// Set requests per minute override
    #[must_use]
    pub fn with_max_requests_per_minute(mut self, rpm: u32) -> Self {
        self.max_requests_per_minute = Some(rpm);
        self
    }

    /// Set queue capacity override
    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    /// Set vector service URL override
    #[must_use]
    pub fn with_vector_url(mut self, url: String) -> Self {
        self.vector_url = Some(url);
        self
    }

    /// Set keyword service URL override
    #[must_use]
    pub fn with_keyword_url(mut self, url: String) -> Self {
        self.keyword_url = Some(url);
        self
    }

    /// Set primary model override
    #[must_use]
    pub fn with_primary_model(mut self, model: String) -> Self {
        self.primary_model = Some(model);
        self
    }

    /// Set fallback model override
    #[must_use]
    pub fn with_fallback_model(mut self, model: String) -> Self {
        self.fallback_model = Some(model);
        self
    }

    fn is_empty(&self) -> bool {
        self.listen_addr.is_none()
            && self.max_requests_per_minute.is_none()
            && self.max_queue_size.is_none()
            && self.vector_url.is_none()
            && self.keyword_url.is_none()
            && self.primary_model.is_none()
            && self.fallback_model.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut GatewayConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(ref addr) = self.listen_addr {
            config.listen_addr = addr.clone();
        }
        if let Some(rpm) = self.max_requests_per_minute {
            config.scheduler.max_requests_per_minute = rpm;
        }
        if let Some(size) = self.max_queue_size {
            config.scheduler.max_queue_size = size;
        }
        if let Some(ref url) = self.vector_url {
            config.vector_url = url.clone();
        }
        if let Some(ref url) = self.keyword_url {
            config.keyword_url = url.clone();
        }
        if let Some(ref model) = self.primary_model {
            config.primary.model = model.clone();
        }
        if let Some(ref model) = self.fallback_model {
            config.fallback.model = model.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
