//! Bounded reopen policy.
//!
//! `RetryPolicy` only tracks the bookkeeping; the session closes its handles and
//! arms the timer on its worker when [`RetryPolicy::try_schedule`] says so.

use std::time::Duration;

use crate::worker::TimerId;

/// Default number of reopen attempts per session lifetime.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default delay before a scheduled reopen fires.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Outcome of a retry request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// A reopen must be scheduled; carries the 1-based attempt number.
    Schedule(u32),
    Stopped,
    Exhausted,
    AlreadyPending,
}

#[derive(Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    count: u32,
    scheduled: bool,
    timer: Option<TimerId>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            count: 0,
            scheduled: false,
            timer: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Decide whether a reopen may be scheduled. On `Schedule`, the counter has been
    /// incremented and the pending flag set. A pending reopen absorbs further
    /// failures even when it spends the last attempt.
    pub fn try_schedule(&mut self, stopped: bool) -> RetryDecision {
        if stopped {
            return RetryDecision::Stopped;
        }
        if self.scheduled {
            return RetryDecision::AlreadyPending;
        }
        if self.count >= self.max_retries {
            return RetryDecision::Exhausted;
        }
        self.count += 1;
        self.scheduled = true;
        RetryDecision::Schedule(self.count)
    }

    /// Remember the timer backing the pending retry.
    pub fn arm(&mut self, timer: TimerId) {
        self.timer = Some(timer);
    }

    /// Consume the pending flag when the timer fires. Returns false when the retry
    /// was cancelled in the meantime.
    pub fn fire(&mut self) -> bool {
        self.timer = None;
        std::mem::replace(&mut self.scheduled, false)
    }

    /// Clear the pending flag, returning the timer to cancel, if any. Safe to call
    /// when nothing is pending.
    pub fn cancel(&mut self) -> Option<TimerId> {
        self.scheduled = false;
        self.timer.take()
    }

    /// Streaming started; the budget is restored.
    pub fn reset(&mut self) {
        self.count = 0;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}
