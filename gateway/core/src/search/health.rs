//! Primary Search Backend Health Monitoring
//!
//! Tracks whether the vector backend should be attempted at all. Two writers
//! feed the same counter:
//!
//! - the periodic probe ([`HealthProbeTask`], default every 30s)
//! - failures observed on the request path ([`HealthMonitor::record_failure`])
//!
//! ```text
//!            failure (n < threshold)
//!           +--------------------+
//!           v                    |
//!   +-----------+   n == threshold   +-------------+
//!   | available | -----------------> | unavailable |
//!   +-----------+                    +-------------+
//!           ^                               |
//!           +-------------------------------+
//!                  any success (n = 0)
//! ```
//!
//! Health checks never fail their caller; probe errors and timeouts are
//! logged and counted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::backends::SearchBackend;
use crate::clock::{SharedClock, SystemClock};

// ============================================================================
// Configuration
// ============================================================================

/// Health monitoring configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthConfig {
    /// Interval between background probes
    pub check_interval: Duration,
    /// Time budget for a single probe
    pub probe_timeout: Duration,
    /// Consecutive failures before the primary is marked unavailable
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

impl HealthConfig {
    /// Set probe interval
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set probe timeout
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }
}

// ============================================================================
// Health Status
// ============================================================================

/// Snapshot of the primary backend's health
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the primary should be attempted
    pub available: bool,
    /// Wall-clock time of the last probe or reported outcome
    pub last_checked: Option<DateTime<Utc>>,
    /// Failures since the last success
    pub consecutive_failures: u32,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            available: true,
            last_checked: None,
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug, Default)]
struct HealthState {
    status: HealthStatus,
    checked_at: Option<Instant>,
}

// ============================================================================
// Health Monitor
// ============================================================================

/// Health monitor for the primary search backend
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct HealthMonitor {
    backend: Arc<dyn SearchBackend>,
    config: HealthConfig,
    clock: SharedClock,
    state: Arc<RwLock<HealthState>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("status", &self.state.read().status)
            .finish()
    }
}

impl HealthMonitor {
    /// Create a monitor for `backend`
    ///
    /// The primary starts out available; the first probe corrects that.
    pub fn new(backend: Arc<dyn SearchBackend>, config: HealthConfig) -> Self {
        Self::with_clock(backend, config, SystemClock::shared())
    }

    /// Create a monitor reading time from `clock`
    pub fn with_clock(
        backend: Arc<dyn SearchBackend>,
        config: HealthConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            backend,
            config,
            clock,
            state: Arc::new(RwLock::new(HealthState::default())),
        }
    }

    /// Monitoring configuration
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Probe the primary once, bounded by `probe_timeout`
    ///
    /// Returns the probe outcome. Never fails.
    pub async fn check_health(&self) -> bool {
        let healthy =
            match tokio::time::timeout(self.config.probe_timeout, self.backend.health_check())
                .await
            {
                Ok(healthy) => healthy,
                Err(_) => {
                    tracing::debug!(
                        backend = self.backend.name(),
                        timeout_ms = self.config.probe_timeout.as_millis() as u64,
                        "Health probe timed out"
                    );
                    false
                }
            };

        if healthy {
            self.record_success();
        } else {
            self.record_failure();
        }
        healthy
    }

    /// Record a successful primary interaction
    pub fn record_success(&self) {
        let mut state = self.state.write();
        let was_available = state.status.available;

        state.status.consecutive_failures = 0;
        state.status.available = true;
        self.stamp(&mut state);

        if !was_available {
            tracing::info!(backend = self.backend.name(), "Primary search backend recovered");
        }
    }

    /// Record a failed primary interaction (probe or request path)
    pub fn record_failure(&self) {
        let mut state = self.state.write();
        let was_available = state.status.available;

        state.status.consecutive_failures = state.status.consecutive_failures.saturating_add(1);
        if state.status.consecutive_failures >= self.config.failure_threshold {
            state.status.available = false;
        }
        self.stamp(&mut state);

        if was_available && !state.status.available {
            tracing::warn!(
                backend = self.backend.name(),
                consecutive_failures = state.status.consecutive_failures,
                "Primary search backend marked unavailable"
            );
        } else {
            tracing::debug!(
                backend = self.backend.name(),
                consecutive_failures = state.status.consecutive_failures,
                "Primary search backend failure recorded"
            );
        }
    }

    /// Whether the primary should be attempted
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state.read().status.available
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        self.state.read().status.clone()
    }

    /// Time since the last recorded outcome, if any
    #[must_use]
    pub fn last_checked_elapsed(&self) -> Option<Duration> {
        let checked_at = self.state.read().checked_at?;
        Some(self.clock.now().saturating_duration_since(checked_at))
    }

    fn stamp(&self, state: &mut HealthState) {
        // last_checked never moves backwards, even if the wall clock does
        let now = Utc::now();
        state.status.last_checked = Some(match state.status.last_checked {
            Some(prev) if prev > now => prev,
            _ => now,
        });
        state.checked_at = Some(self.clock.now());
    }
}

// ============================================================================
// Background Probe
// ============================================================================

/// Periodic health probe running on its own task
#[derive(Debug)]
pub struct HealthProbeTask {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl HealthProbeTask {
    /// Start probing on `monitor.config().check_interval`
    ///
    /// The first probe runs immediately.
    #[must_use]
    pub fn spawn(monitor: HealthMonitor) -> Self {
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run_probe_loop(monitor, Arc::clone(&shutdown)));
        Self { shutdown, handle }
    }

    /// Stop probing and wait for the task to exit
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Health probe task ended abnormally");
        }
    }

    /// Whether the probe task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run_probe_loop(monitor: HealthMonitor, shutdown: Arc<Notify>) {
    tracing::info!(
        interval_secs = monitor.config.check_interval.as_secs(),
        failure_threshold = monitor.config.failure_threshold,
        "Starting search health probe"
    );

    let mut interval = tokio::time::interval(monitor.config.check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let healthy = monitor.check_health().await;
                tracing::trace!(healthy, "Search health probe completed");
            }
            () = shutdown.notified() => {
                tracing::info!("Search health probe stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;
    use crate::search::backends::SearchBackendError;
    use crate::search::types::{RawHit, SearchQuery};

    struct ProbeBackend {
        healthy: AtomicBool,
        probe_delay: Duration,
        probes: AtomicU32,
    }

    impl ProbeBackend {
        fn new(healthy: bool) -> Arc<Self> {
            Self::slow(healthy, Duration::ZERO)
        }

        fn slow(healthy: bool, probe_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(healthy),
                probe_delay,
                probes: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl SearchBackend for ProbeBackend {
        fn name(&self) -> &str {
            "probe"
        }

        async fn query(&self, _query: &SearchQuery) -> Result<Vec<RawHit>, SearchBackendError> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if !self.probe_delay.is_zero() {
                tokio::time::sleep(self.probe_delay).await;
            }
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_default_config() {
        let config = HealthConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.failure_threshold, 3);
    }

    #[tokio::test]
    async fn test_unavailable_after_threshold() {
        let backend = ProbeBackend::new(false);
        let monitor = HealthMonitor::new(backend, HealthConfig::default());

        assert!(!monitor.check_health().await);
        assert!(!monitor.check_health().await);
        assert!(monitor.is_available(), "still below threshold");

        assert!(!monitor.check_health().await);
        let status = monitor.status();
        assert!(!status.available);
        assert_eq!(status.consecutive_failures, 3);
        assert!(status.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_success_resets_and_recovers() {
        let backend = ProbeBackend::new(false);
        let monitor = HealthMonitor::new(backend.clone(), HealthConfig::default());

        for _ in 0..3 {
            monitor.check_health().await;
        }
        assert!(!monitor.is_available());

        backend.healthy.store(true, Ordering::SeqCst);
        assert!(monitor.check_health().await);
        assert!(monitor.is_available());
        assert_eq!(monitor.status().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let backend = ProbeBackend::slow(true, Duration::from_millis(500));
        let config = HealthConfig::default()
            .with_probe_timeout(Duration::from_millis(20))
            .with_failure_threshold(1);
        let monitor = HealthMonitor::new(backend, config);

        let started = Instant::now();
        assert!(!monitor.check_health().await);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(!monitor.is_available());
    }

    #[test]
    fn test_request_path_failures_share_the_counter() {
        let monitor = HealthMonitor::new(ProbeBackend::new(true), HealthConfig::default());

        monitor.record_failure();
        monitor.record_failure();
        monitor.record_success();
        monitor.record_failure();
        assert!(monitor.is_available());
        assert_eq!(monitor.status().consecutive_failures, 1);
    }

    #[test]
    fn test_last_checked_is_monotonic() {
        let clock = ManualClock::shared();
        let monitor = HealthMonitor::with_clock(
            ProbeBackend::new(true),
            HealthConfig::default(),
            clock.clone(),
        );
        assert!(monitor.last_checked_elapsed().is_none());

        monitor.record_success();
        let first = monitor.status().last_checked;
        clock.advance(Duration::from_secs(12));
        assert_eq!(monitor.last_checked_elapsed(), Some(Duration::from_secs(12)));

        monitor.record_failure();
        assert!(monitor.status().last_checked >= first);
        assert_eq!(monitor.last_checked_elapsed(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_probe_task_runs_until_stopped() {
        let backend = ProbeBackend::new(false);
        let config = HealthConfig::default().with_check_interval(Duration::from_millis(10));
        let monitor = HealthMonitor::new(backend.clone(), config);

        let task = HealthProbeTask::spawn(monitor.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.stop().await;

        let probes = backend.probes.load(Ordering::SeqCst);
        assert!(probes >= 3, "expected several probes, got {probes}");
        assert!(!monitor.is_available());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.probes.load(Ordering::SeqCst), probes);
    }
}
