//! Rate-Limited Inference Scheduler
//!
//! Front door for chat generation. Every request ends up on exactly one of
//! two models:
//!
//! ```text
//!                 generate(request)
//!                        |
//!               queue empty & slot free? ----yes----> primary ---ok---> response
//!                        | no                            | fail/timeout
//!                        v                               v
//!                 room in queue? ---no-------------> fallback model
//!                        | yes                           ^
//!                        v                               |
//!                 wait (queue_timeout) ---timeout--------+
//!                        | dispatched                    |
//!                        v                               |
//!                     primary ----fail/timeout-----------+
//! ```
//!
//! A single dispatcher task drains the queue in FIFO order as slots free.
//! Streaming requests never wait: they either get a slot immediately or go to
//! the fallback model.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::admission::{AdmissionController, AdmissionDecision};
use super::queue::{DispatchStep, QueueSignal, QueueTicket, RequestQueue, Submission};
use crate::backend::{LlmBackend, LlmRequest, LlmResponse, StreamingToken};
use crate::clock::{SharedClock, SystemClock};

// ============================================================================
// Configuration
// ============================================================================

/// Scheduler configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Ceiling on primary requests in any trailing 60s
    pub max_requests_per_minute: u32,
    /// Maximum number of waiting requests
    pub max_queue_size: usize,
    /// Maximum time a request waits for a slot
    pub queue_timeout: Duration,
    /// Budget for a primary call (or the start of a primary stream)
    pub primary_timeout: Duration,
    /// Upper bound on how long the dispatcher sleeps between checks
    pub dispatch_poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
            max_queue_size: 100,
            queue_timeout: Duration::from_secs(30),
            primary_timeout: Duration::from_secs(60),
            dispatch_poll_interval: Duration::from_millis(100),
        }
    }
}

impl SchedulerConfig {
    /// Set the per-minute ceiling
    #[must_use]
    pub fn with_max_requests_per_minute(mut self, max: u32) -> Self {
        self.max_requests_per_minute = max;
        self
    }

    /// Set queue capacity
    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the queue wait limit
    #[must_use]
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Set the primary call budget
    #[must_use]
    pub fn with_primary_timeout(mut self, timeout: Duration) -> Self {
        self.primary_timeout = timeout;
        self
    }

    /// Set the dispatcher poll bound
    #[must_use]
    pub fn with_dispatch_poll_interval(mut self, interval: Duration) -> Self {
        self.dispatch_poll_interval = interval;
        self
    }
}

// ============================================================================
// Results and Errors
// ============================================================================

/// Why a request was served by the fallback model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Limit configured as zero
    PrimaryDisabled,
    /// Window full and streaming cannot wait
    RateLimited,
    /// Window full and no room in the queue
    QueueFull,
    /// Waited `queue_timeout` without a slot
    QueueTimeout,
    /// Scheduler stopped while the request was waiting
    SchedulerStopped,
    /// Primary errored or exceeded its budget
    PrimaryFailed,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryDisabled => write!(f, "primary disabled"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::QueueFull => write!(f, "queue full"),
            Self::QueueTimeout => write!(f, "queue timeout"),
            Self::SchedulerStopped => write!(f, "scheduler stopped"),
            Self::PrimaryFailed => write!(f, "primary failed"),
        }
    }
}

/// Result of [`RateLimitedScheduler::generate`]
#[derive(Clone, Debug)]
pub struct GenerateOutcome {
    /// Model response
    pub response: LlmResponse,
    /// Whether the fallback model produced it
    pub used_fallback: bool,
    /// Why the fallback was used
    pub fallback_reason: Option<FallbackReason>,
}

/// Result of [`RateLimitedScheduler::generate_stream`]
#[derive(Debug)]
pub struct ChatStream {
    /// Whether the fallback model is streaming
    pub used_fallback: bool,
    /// Why the fallback was used
    pub fallback_reason: Option<FallbackReason>,
    /// Token stream; closes after `Complete` or `Error`
    pub receiver: mpsc::Receiver<StreamingToken>,
}

/// Read-only scheduler snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Requests waiting for a slot
    pub queue_size: usize,
    /// Queue capacity
    pub queue_capacity: usize,
    /// Primary requests in the trailing 60s
    pub requests_last_minute: u32,
    /// Slots left in the window
    pub capacity_remaining: u32,
    /// `requests_last_minute / max_requests_per_minute`
    pub utilization: f64,
    /// Configured ceiling
    pub max_requests_per_minute: u32,
    /// Whether the dispatcher is running
    pub running: bool,
    /// Fallback model is always configured
    pub fallback_available: bool,
}

/// Scheduler errors
///
/// Capacity problems never show up here; they are absorbed by the fallback.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `start` has not been called, or `stop` has
    #[error("scheduler is not running")]
    NotRunning,

    /// `start` called twice
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// The fallback model failed; there is no further tier
    #[error("fallback model failed: {0:#}")]
    Fallback(anyhow::Error),
}

// ============================================================================
// Scheduler
// ============================================================================

struct SchedulerInner {
    config: SchedulerConfig,
    primary: Arc<dyn LlmBackend>,
    fallback: Arc<dyn LlmBackend>,
    admission: AdmissionController,
    queue: RequestQueue,
}

struct Dispatcher {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Rate-limited scheduler with a fallback model
///
/// Cheap to clone; clones share the window, queue and dispatcher.
#[derive(Clone)]
pub struct RateLimitedScheduler {
    inner: Arc<SchedulerInner>,
    dispatcher: Arc<Mutex<Option<Dispatcher>>>,
}

impl fmt::Debug for RateLimitedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedScheduler")
            .field("primary", &self.inner.primary.name())
            .field("fallback", &self.inner.fallback.name())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl RateLimitedScheduler {
    /// Create a stopped scheduler
    pub fn new(
        primary: Arc<dyn LlmBackend>,
        fallback: Arc<dyn LlmBackend>,
        config: SchedulerConfig,
    ) -> Self {
        Self::with_clock(primary, fallback, config, SystemClock::shared())
    }

    /// Create a stopped scheduler whose window reads time from `clock`
    pub fn with_clock(
        primary: Arc<dyn LlmBackend>,
        fallback: Arc<dyn LlmBackend>,
        config: SchedulerConfig,
        clock: SharedClock,
    ) -> Self {
        let admission =
            AdmissionController::new(config.max_requests_per_minute, Arc::clone(&clock));
        let queue = RequestQueue::new(config.max_queue_size, clock);

        Self {
            inner: Arc::new(SchedulerInner {
                config,
                primary,
                fallback,
                admission,
                queue,
            }),
            dispatcher: Arc::new(Mutex::new(None)),
        }
    }

    /// Scheduler configuration
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Start accepting requests and spawn the dispatcher
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run_dispatcher(
            Arc::clone(&self.inner),
            Arc::clone(&shutdown),
        ));
        self.inner.queue.open();
        *dispatcher = Some(Dispatcher { shutdown, handle });

        tracing::info!(
            primary = self.inner.primary.name(),
            fallback = self.inner.fallback.name(),
            max_requests_per_minute = self.inner.config.max_requests_per_minute,
            max_queue_size = self.inner.config.max_queue_size,
            queue_timeout_secs = self.inner.config.queue_timeout.as_secs(),
            "Inference scheduler started"
        );
        Ok(())
    }

    /// Stop the dispatcher and resolve every waiting request
    ///
    /// Waiting callers are served by the fallback model. Later calls fail
    /// with [`SchedulerError::NotRunning`] until `start` is called again.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let Some(dispatcher) = self.dispatcher.lock().take() else {
            return Err(SchedulerError::NotRunning);
        };

        let resolved = self.inner.queue.close();
        dispatcher.shutdown.notify_one();
        if let Err(e) = dispatcher.handle.await {
            tracing::warn!(error = %e, "Dispatcher task ended abnormally");
        }

        tracing::info!(resolved_waiters = resolved, "Inference scheduler stopped");
        Ok(())
    }

    /// Whether the scheduler is accepting requests
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.queue.is_open()
    }

    /// Generate a complete response
    pub async fn generate(&self, request: LlmRequest) -> Result<GenerateOutcome, SchedulerError> {
        let inner = &self.inner;
        match inner.queue.submit(request, &inner.admission) {
            Submission::Closed(_) => Err(SchedulerError::NotRunning),
            Submission::Direct(request) => inner.call_primary(request).await,
            Submission::Rejected(request) => {
                inner
                    .call_fallback(request, FallbackReason::PrimaryDisabled)
                    .await
            }
            Submission::Full(request) => {
                tracing::warn!(
                    queue_size = inner.queue.len(),
                    prompt = %request.preview(),
                    "Request queue full, routing to fallback"
                );
                inner.call_fallback(request, FallbackReason::QueueFull).await
            }
            Submission::Queued(ticket) => {
                tracing::debug!(
                    id = %ticket.id,
                    queue_size = inner.queue.len(),
                    "Rate limit reached, request queued"
                );
                inner.await_dispatch(ticket).await
            }
        }
    }

    /// Generate a streamed response
    ///
    /// Never waits in the queue.
    pub async fn generate_stream(&self, request: LlmRequest) -> Result<ChatStream, SchedulerError> {
        let inner = &self.inner;
        let reason = match inner.queue.try_admit(&inner.admission) {
            None => return Err(SchedulerError::NotRunning),
            Some(AdmissionDecision::Allowed) => {
                match tokio::time::timeout(
                    inner.config.primary_timeout,
                    inner.primary.send_streaming(&request),
                )
                .await
                {
                    Ok(Ok(receiver)) => {
                        return Ok(ChatStream {
                            used_fallback: false,
                            fallback_reason: None,
                            receiver,
                        });
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Primary stream failed to start");
                        FallbackReason::PrimaryFailed
                    }
                    Err(_) => {
                        tracing::warn!("Primary stream timed out before starting");
                        FallbackReason::PrimaryFailed
                    }
                }
            }
            Some(AdmissionDecision::MustQueue) => FallbackReason::RateLimited,
            Some(AdmissionDecision::Rejected) => FallbackReason::PrimaryDisabled,
        };

        tracing::info!(reason = %reason, prompt = %request.preview(), "Streaming from fallback model");
        let receiver = inner
            .fallback
            .send_streaming(&request)
            .await
            .map_err(SchedulerError::Fallback)?;

        Ok(ChatStream {
            used_fallback: true,
            fallback_reason: Some(reason),
            receiver,
        })
    }

    /// Prompts waiting for a rate-limit slot, in dispatch order
    #[must_use]
    pub fn pending_prompts(&self) -> Vec<String> {
        self.inner
            .queue
            .pending()
            .into_iter()
            .map(|request| request.prompt)
            .collect()
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let inner = &self.inner;
        SchedulerStatus {
            queue_size: inner.queue.len(),
            queue_capacity: inner.queue.capacity(),
            requests_last_minute: inner.admission.requests_last_minute(),
            capacity_remaining: inner.admission.capacity_remaining(),
            utilization: inner.admission.utilization(),
            max_requests_per_minute: inner.admission.max_requests_per_minute(),
            running: inner.queue.is_open(),
            fallback_available: true,
        }
    }
}

impl SchedulerInner {
    async fn await_dispatch(&self, ticket: QueueTicket) -> Result<GenerateOutcome, SchedulerError> {
        let QueueTicket {
            id,
            mut receiver,
            request,
        } = ticket;

        let signal = match tokio::time::timeout(self.config.queue_timeout, &mut receiver).await {
            Ok(Ok(signal)) => Some(signal),
            Ok(Err(_)) => None,
            Err(_) => {
                if self.queue.remove(id) {
                    tracing::warn!(
                        id = %id,
                        timeout_secs = self.config.queue_timeout.as_secs(),
                        "Queued request timed out, routing to fallback"
                    );
                    None
                } else {
                    // Lost the race: the dispatcher or stop() already resolved it
                    receiver.try_recv().ok()
                }
            }
        };

        match signal {
            Some(QueueSignal::Dispatched) => self.call_primary(request).await,
            Some(QueueSignal::Stopped) => {
                self.call_fallback(request, FallbackReason::SchedulerStopped)
                    .await
            }
            None => self.call_fallback(request, FallbackReason::QueueTimeout).await,
        }
    }

    async fn call_primary(&self, request: LlmRequest) -> Result<GenerateOutcome, SchedulerError> {
        match tokio::time::timeout(self.config.primary_timeout, self.primary.send(&request)).await
        {
            Ok(Ok(response)) => Ok(GenerateOutcome {
                response,
                used_fallback: false,
                fallback_reason: None,
            }),
            Ok(Err(e)) => {
                tracing::warn!(backend = self.primary.name(), error = %e, "Primary model failed");
                self.call_fallback(request, FallbackReason::PrimaryFailed)
                    .await
            }
            Err(_) => {
                tracing::warn!(
                    backend = self.primary.name(),
                    timeout_secs = self.config.primary_timeout.as_secs(),
                    "Primary model timed out"
                );
                self.call_fallback(request, FallbackReason::PrimaryFailed)
                    .await
            }
        }
    }

    async fn call_fallback(
        &self,
        request: LlmRequest,
        reason: FallbackReason,
    ) -> Result<GenerateOutcome, SchedulerError> {
        tracing::info!(
            backend = self.fallback.name(),
            reason = %reason,
            prompt = %request.preview(),
            "Using fallback model"
        );

        let response = self
            .fallback
            .send(&request)
            .await
            .map_err(SchedulerError::Fallback)?;

        Ok(GenerateOutcome {
            response,
            used_fallback: true,
            fallback_reason: Some(reason),
        })
    }
}

async fn run_dispatcher(inner: Arc<SchedulerInner>, shutdown: Arc<Notify>) {
    let poll = inner.config.dispatch_poll_interval;
    tracing::debug!(poll_ms = poll.as_millis() as u64, "Dispatcher started");

    loop {
        let wait = match inner.queue.dispatch_next(&inner.admission) {
            DispatchStep::Dispatched => continue,
            DispatchStep::Idle => poll,
            DispatchStep::Throttled(next_slot) => next_slot.map_or(poll, |d| d.min(poll)),
        };

        tokio::select! {
            () = shutdown.notified() => break,
            () = inner.queue.notified() => {}
            () = tokio::time::sleep(wait) => {}
        }
    }

    tracing::debug!("Dispatcher stopped");
}
