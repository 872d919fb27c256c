//! Timed Poll
//!
//! A bounded, cancellable wait that runs on the simulation thread. The
//! caller invokes [`TimedPoll::poll`] once per tick; the condition is
//! checked at most once per interval and the poll gives up after the
//! timeout. Nothing here sleeps or blocks.

use std::time::{Duration, Instant};

/// Result of one poll step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The condition produced a value.
    Ready(T),
    /// Not yet; call again next tick.
    Pending,
    /// Timeout elapsed without a value.
    TimedOut,
    /// Cancelled by the caller.
    Cancelled,
}

impl<T> PollOutcome<T> {
    /// Whether the poll is over, one way or another.
    pub fn is_finished(&self) -> bool {
        !matches!(self, PollOutcome::Pending)
    }
}

/// Waits for a condition with a deadline.
#[derive(Debug, Clone)]
pub struct TimedPoll {
    started: Instant,
    timeout: Duration,
    interval: Duration,
    last_check: Option<Instant>,
    cancelled: bool,
}

impl TimedPoll {
    /// Start a poll at `now`.
    pub fn new(now: Instant, timeout: Duration, interval: Duration) -> Self {
        Self {
            started: now,
            timeout,
            interval,
            last_check: None,
            cancelled: false,
        }
    }

    /// Time spent waiting so far.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Stop waiting. Every later step reports `Cancelled`.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Run `check` if an interval has passed since the last check.
    pub fn poll<T>(&mut self, now: Instant, check: impl FnOnce() -> Option<T>) -> PollOutcome<T> {
        if self.cancelled {
            return PollOutcome::Cancelled;
        }

        let due = self
            .last_check
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last_check = Some(now);
            if let Some(value) = check() {
                return PollOutcome::Ready(value);
            }
        }

        if self.elapsed(now) >= self.timeout {
            PollOutcome::TimedOut
        } else {
            PollOutcome::Pending
        }
    }
}
