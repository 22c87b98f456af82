//! Rate-Limited Inference
//!
//! Protects a rate-limited primary model from bursts. Requests beyond the
//! per-minute ceiling wait in a bounded FIFO queue; anything that cannot be
//! served by the primary in time is answered by the fallback model instead
//! of failing.
//!
//! # Usage
//!
//! ```ignore
//! use gateway_core::inference::{RateLimitedScheduler, SchedulerConfig};
//!
//! let scheduler = RateLimitedScheduler::new(primary, fallback, SchedulerConfig::default());
//! scheduler.start()?;
//!
//! let outcome = scheduler.generate(LlmRequest::new("Explain this diff")).await?;
//! if outcome.used_fallback {
//!     // tell the user a smaller model answered
//! }
//!
//! scheduler.stop().await?;
//! ```

mod admission;
mod queue;
mod scheduler;

pub use admission::{AdmissionController, AdmissionDecision, RATE_WINDOW};
pub use queue::{
    DispatchStep, EnqueueOutcome, QueueSignal, QueueTicket, QueuedRequest, RequestQueue,
    Submission,
};
pub use scheduler::{
    ChatStream, FallbackReason, GenerateOutcome, RateLimitedScheduler, SchedulerConfig,
    SchedulerError, SchedulerStatus,
};
