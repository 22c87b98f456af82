//! Gateway Daemon - HTTP Front for Resilient Search and Chat
//!
//! Loads configuration, wires the search tiers and inference backends into
//! `gateway-core`, and serves them over HTTP until a shutdown signal arrives.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (config from ~/.config/devmind/gateway.toml if present)
//! gateway-daemon
//!
//! # Custom config and a tighter rate limit
//! gateway-daemon --config /etc/devmind/gateway.toml --max-rpm 30
//!
//! # Verbose logging
//! RUST_LOG=debug gateway-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (queued chat requests are
//!   answered by the fallback model before exit)

mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use gateway_core::{
    default_config_path, load_config_from_path, ConfigOverrides, FallbackSearch, GatewayConfig,
    HealthMonitor, HealthProbeTask, HttpSearchBackend, MemoryCache, OllamaBackend,
    RateLimitedScheduler,
};

use server::AppState;

/// Gateway Daemon - Degrading search and rate-limited chat over HTTP
#[derive(Parser, Debug)]
#[command(name = "gateway-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "GATEWAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on (host:port)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Maximum primary-model requests per minute
    #[arg(long, value_name = "N")]
    max_rpm: Option<u32>,

    /// Maximum number of requests waiting for a slot
    #[arg(long, value_name = "N")]
    max_queue_size: Option<usize>,

    /// Base URL of the vector search service
    #[arg(long, value_name = "URL")]
    vector_url: Option<String>,

    /// Base URL of the keyword search service
    #[arg(long, value_name = "URL")]
    keyword_url: Option<String>,

    /// Primary (remote) model name
    #[arg(long, value_name = "MODEL")]
    primary_model: Option<String>,

    /// Fallback (local) model name
    #[arg(long, value_name = "MODEL")]
    fallback_model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref addr) = self.listen {
            overrides = overrides.with_listen_addr(addr.clone());
        }
        if let Some(rpm) = self.max_rpm {
            overrides = overrides.with_max_requests_per_minute(rpm);
        }
        if let Some(size) = self.max_queue_size {
            overrides = overrides.with_max_queue_size(size);
        }
        if let Some(ref url) = self.vector_url {
            overrides = overrides.with_vector_url(url.clone());
        }
        if let Some(ref url) = self.keyword_url {
            overrides = overrides.with_keyword_url(url.clone());
        }
        if let Some(ref model) = self.primary_model {
            overrides = overrides.with_primary_model(model.clone());
        }
        if let Some(ref model) = self.fallback_model {
            overrides = overrides.with_fallback_model(model.clone());
        }
        overrides
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("gateway_daemon={level},gateway_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Resolve configuration: file, then environment, then CLI flags
fn resolve_config(args: &Args) -> Result<GatewayConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler, using Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, initiating shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Gateway daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    info!(
        source = %config.source(),
        listen_addr = %config.listen_addr,
        config_file = ?config.config_file_path,
        "Configuration loaded"
    );

    // Search tiers
    let vector = Arc::new(HttpSearchBackend::new("vector", &config.vector_url));
    let keyword = Arc::new(HttpSearchBackend::new("keyword", &config.keyword_url));
    let cache = Arc::new(MemoryCache::new(config.cache_max_entries));
    let health = HealthMonitor::new(vector.clone(), config.health.clone());
    let probe = HealthProbeTask::spawn(health.clone());
    let search = FallbackSearch::new(vector, keyword, cache, health, config.search.clone());

    // Inference
    let primary = Arc::new(OllamaBackend::from_config(&config.primary));
    let fallback = Arc::new(OllamaBackend::from_config(&config.fallback));
    let scheduler = RateLimitedScheduler::new(primary, fallback, config.scheduler.clone());
    scheduler.start()?;

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening");

    let app = server::router(AppState::new(search, scheduler.clone()));
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Shutting down...");
    if let Err(e) = scheduler.stop().await {
        error!(error = %e, "Scheduler did not stop cleanly");
    }
    probe.stop().await;

    match result {
        Ok(()) => {
            info!("Gateway daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e.into())
        }
    }
}
