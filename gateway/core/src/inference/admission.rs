//! Sliding-Window Admission Control
//!
//! Keeps the timestamps of every request issued to the primary model in the
//! trailing 60 seconds. [`AdmissionController::admit`] checks the count and
//! records the new timestamp under one lock, so concurrent callers can never
//! both take the last slot.
//!
//! ```text
//!   now - 60s                                   now
//!      |-----x------x--x-----------x-------------|
//!            ^ oldest                  count < limit -> Allowed
//!                                      count = limit -> MustQueue
//!                                              (slot frees when oldest ages out)
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;

/// Length of the rate-limit window
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of an admission check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// Slot taken; the request may go to the primary now
    Allowed,
    /// Window is full; the request should wait in the queue
    MustQueue,
    /// Primary is disabled (limit of zero); go straight to the fallback
    Rejected,
}

/// Rolling one-minute request counter for the primary model
#[derive(Debug)]
pub struct AdmissionController {
    max_requests_per_minute: u32,
    issued: Mutex<VecDeque<Instant>>,
    clock: SharedClock,
}

impl AdmissionController {
    /// Create a controller allowing `max_requests_per_minute`
    #[must_use]
    pub fn new(max_requests_per_minute: u32, clock: SharedClock) -> Self {
        Self {
            max_requests_per_minute,
            issued: Mutex::new(VecDeque::with_capacity(max_requests_per_minute as usize)),
            clock,
        }
    }

    /// Configured ceiling
    #[must_use]
    pub fn max_requests_per_minute(&self) -> u32 {
        self.max_requests_per_minute
    }

    /// Check for a free slot and take it if there is one
    pub fn admit(&self) -> AdmissionDecision {
        if self.max_requests_per_minute == 0 {
            return AdmissionDecision::Rejected;
        }

        let now = self.clock.now();
        let mut issued = self.issued.lock();
        prune(&mut issued, now);

        if issued.len() < self.max_requests_per_minute as usize {
            issued.push_back(now);
            AdmissionDecision::Allowed
        } else {
            AdmissionDecision::MustQueue
        }
    }

    /// Requests issued in the trailing window
    #[must_use]
    pub fn requests_last_minute(&self) -> u32 {
        let now = self.clock.now();
        let issued = self.issued.lock();
        let live = issued.iter().filter(|t| in_window(**t, now)).count();
        u32::try_from(live).unwrap_or(u32::MAX)
    }

    /// Slots left in the trailing window
    #[must_use]
    pub fn capacity_remaining(&self) -> u32 {
        self.max_requests_per_minute
            .saturating_sub(self.requests_last_minute())
    }

    /// Fraction of the window in use (1.0 when the primary is disabled)
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_requests_per_minute == 0 {
            return 1.0;
        }
        f64::from(self.requests_last_minute()) / f64::from(self.max_requests_per_minute)
    }

    /// Time until the next slot frees, `None` if one is free now
    #[must_use]
    pub fn next_slot_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        let mut issued = self.issued.lock();
        prune(&mut issued, now);

        if issued.len() < self.max_requests_per_minute as usize {
            return None;
        }
        issued
            .front()
            .map(|oldest| (*oldest + RATE_WINDOW).saturating_duration_since(now))
    }
}

fn in_window(issued_at: Instant, now: Instant) -> bool {
    now.saturating_duration_since(issued_at) < RATE_WINDOW
}

fn prune(issued: &mut VecDeque<Instant>, now: Instant) {
    while issued.front().is_some_and(|t| !in_window(*t, now)) {
        issued.pop_front();
    }
}
