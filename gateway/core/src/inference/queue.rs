//! Bounded FIFO Request Queue
//!
//! Holds generate requests that arrived while the rate-limit window was full.
//! The queue mutex is the single arbitration point for three racing parties:
//!
//! - new callers deciding between direct admission and enqueueing
//! - the dispatcher popping the oldest entry once a slot frees
//! - a timed-out caller withdrawing its own entry
//!
//! Whoever takes an entry out under the lock owns its outcome, so an entry is
//! dispatched or withdrawn exactly once.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

use super::admission::{AdmissionController, AdmissionDecision};
use crate::backend::LlmRequest;
use crate::clock::SharedClock;

// ============================================================================
// Types
// ============================================================================

/// Resolution sent to a waiting caller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueSignal {
    /// A rate-limit slot was taken for this request; call the primary
    Dispatched,
    /// The scheduler stopped before the request was dispatched
    Stopped,
}

/// A request waiting for a rate-limit slot
#[derive(Debug)]
pub struct QueuedRequest {
    /// Entry identifier
    pub id: Uuid,
    /// Request payload
    pub request: LlmRequest,
    /// When the request entered the queue
    pub enqueued_at: Instant,
    completion: oneshot::Sender<QueueSignal>,
}

/// Caller side of a queued request
#[derive(Debug)]
pub struct QueueTicket {
    /// Entry identifier, used to withdraw on timeout
    pub id: Uuid,
    /// Resolves when the entry is dispatched or the queue closes
    pub receiver: oneshot::Receiver<QueueSignal>,
    /// Caller's copy of the request
    pub request: LlmRequest,
}

/// Result of a plain enqueue
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Appended; await the ticket
    Queued(QueueTicket),
    /// At capacity; the request is handed back
    Full(LlmRequest),
}

/// Result of submitting a request to the scheduler path
#[derive(Debug)]
pub enum Submission {
    /// Slot taken immediately
    Direct(LlmRequest),
    /// Primary disabled
    Rejected(LlmRequest),
    /// Waiting for a slot
    Queued(QueueTicket),
    /// No slot and no room to wait
    Full(LlmRequest),
    /// Queue is not accepting work (scheduler not running)
    Closed(LlmRequest),
}

/// One dispatcher iteration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchStep {
    /// Nothing queued
    Idle,
    /// Oldest entry was dispatched
    Dispatched,
    /// Entries are waiting; the next slot frees in this long (if known)
    Throttled(Option<Duration>),
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<QueuedRequest>,
    open: bool,
}

// ============================================================================
// Request Queue
// ============================================================================

/// Bounded FIFO of rate-limited requests
#[derive(Debug)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    notify: Notify,
    clock: SharedClock,
}

impl RequestQueue {
    /// Create a closed queue holding at most `capacity` entries
    ///
    /// Enqueue times are read from `clock`.
    #[must_use]
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity,
            notify: Notify::new(),
            clock,
        }
    }

    /// Maximum number of waiting entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of waiting entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Whether new work is accepted
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Start accepting work
    pub fn open(&self) {
        self.state.lock().open = true;
    }

    /// Waiting requests, oldest first
    #[must_use]
    pub fn pending(&self) -> Vec<LlmRequest> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|entry| entry.request.clone())
            .collect()
    }

    /// Append a request if there is room
    pub fn enqueue(&self, request: LlmRequest) -> EnqueueOutcome {
        let mut state = self.state.lock();
        self.push_locked(&mut state, request)
    }

    /// Take a slot directly if nobody is waiting, otherwise enqueue
    ///
    /// Direct admission is only attempted with an empty queue so a newcomer
    /// cannot overtake requests already waiting for the same slot.
    pub fn submit(&self, request: LlmRequest, admission: &AdmissionController) -> Submission {
        let mut state = self.state.lock();
        if !state.open {
            return Submission::Closed(request);
        }

        if state.entries.is_empty() {
            match admission.admit() {
                AdmissionDecision::Allowed => return Submission::Direct(request),
                AdmissionDecision::Rejected => return Submission::Rejected(request),
                AdmissionDecision::MustQueue => {}
            }
        }

        match self.push_locked(&mut state, request) {
            EnqueueOutcome::Queued(ticket) => {
                drop(state);
                self.notify.notify_one();
                Submission::Queued(ticket)
            }
            EnqueueOutcome::Full(request) => Submission::Full(request),
        }
    }

    /// Admission check for callers that never wait (streaming)
    ///
    /// Returns `None` when the queue is closed. Waiting entries take priority,
    /// so a non-empty queue yields `MustQueue` without consuming a slot.
    pub fn try_admit(&self, admission: &AdmissionController) -> Option<AdmissionDecision> {
        let state = self.state.lock();
        if !state.open {
            return None;
        }
        if !state.entries.is_empty() {
            return Some(if admission.max_requests_per_minute() == 0 {
                AdmissionDecision::Rejected
            } else {
                AdmissionDecision::MustQueue
            });
        }
        Some(admission.admit())
    }

    /// Dispatch the oldest entry if a slot is free
    pub fn dispatch_next(&self, admission: &AdmissionController) -> DispatchStep {
        let mut state = self.state.lock();

        // Callers that gave up without withdrawing must not consume a slot
        while state
            .entries
            .front()
            .is_some_and(|entry| entry.completion.is_closed())
        {
            if let Some(entry) = state.entries.pop_front() {
                tracing::debug!(id = %entry.id, "Discarding abandoned queue entry");
            }
        }

        if state.entries.is_empty() {
            return DispatchStep::Idle;
        }

        match admission.admit() {
            AdmissionDecision::Allowed => {
                let Some(entry) = state.entries.pop_front() else {
                    return DispatchStep::Idle;
                };
                tracing::debug!(
                    id = %entry.id,
                    waited_ms = self.clock.now().saturating_duration_since(entry.enqueued_at).as_millis() as u64,
                    prompt = %entry.request.preview(),
                    queue_size = state.entries.len(),
                    "Dispatching queued request"
                );
                if entry.completion.send(QueueSignal::Dispatched).is_err() {
                    tracing::debug!(id = %entry.id, "Queued caller went away before dispatch");
                }
                DispatchStep::Dispatched
            }
            AdmissionDecision::MustQueue => DispatchStep::Throttled(admission.next_slot_in()),
            AdmissionDecision::Rejected => DispatchStep::Throttled(None),
        }
    }

    /// Withdraw an entry; `true` if it was still waiting
    pub fn remove(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        state.entries.remove(pos);
        true
    }

    /// Stop accepting work and resolve every waiting entry with `Stopped`
    ///
    /// Signals are sent under the lock, so a caller that fails to withdraw
    /// its entry always finds `Stopped` already waiting in its receiver.
    /// Returns the number of entries resolved.
    pub fn close(&self) -> usize {
        let mut state = self.state.lock();
        state.open = false;

        let count = state.entries.len();
        for entry in state.entries.drain(..) {
            let _ = entry.completion.send(QueueSignal::Stopped);
        }
        drop(state);

        self.notify.notify_one();
        count
    }

    /// Wake the dispatcher
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Wait for a wake-up
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    fn push_locked(&self, state: &mut QueueState, request: LlmRequest) -> EnqueueOutcome {
        if state.entries.len() >= self.capacity {
            return EnqueueOutcome::Full(request);
        }

        let (completion, receiver) = oneshot::channel();
        let id = Uuid::new_v4();
        state.entries.push_back(QueuedRequest {
            id,
            request: request.clone(),
            enqueued_at: self.clock.now(),
            completion,
        });

        EnqueueOutcome::Queued(QueueTicket {
            id,
            receiver,
            request,
        })
    }
}
