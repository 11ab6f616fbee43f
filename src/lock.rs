//! Single-permit resource lock.
//!
//! Serializes "device open" against "device close" across the caller thread and the
//! session worker. Unlike a `MutexGuard`, a [`ResourcePermit`] is an owned value: an
//! open attempt acquires it on the worker and keeps it until the asynchronous open
//! outcome has been handled, possibly several messages later.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct LockState {
    held: Mutex<bool>,
    released: Condvar,
}

/// Counting lock with exactly one permit.
#[derive(Clone, Debug, Default)]
pub struct ResourceLock {
    state: Arc<LockState>,
}

impl ResourceLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the permit.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<ResourcePermit> {
        let deadline = Instant::now() + timeout;
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *held {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .state
                .released
                .wait_timeout(held, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }
        *held = true;
        Some(self.permit())
    }

    /// Block until the permit is available.
    pub fn acquire(&self) -> ResourcePermit {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = self
                .state
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        self.permit()
    }

    pub fn is_held(&self) -> bool {
        *self
            .state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn permit(&self) -> ResourcePermit {
        ResourcePermit {
            state: self.state.clone(),
        }
    }
}

/// Proof of holding the [`ResourceLock`]. Dropping it releases the lock.
#[derive(Debug)]
#[must_use = "dropping the permit releases the lock immediately"]
pub struct ResourcePermit {
    state: Arc<LockState>,
}

impl Drop for ResourcePermit {
    fn drop(&mut self) {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *held = false;
        self.state.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn second_acquire_times_out_while_held() {
        let lock = ResourceLock::new();
        let _permit = lock.acquire();
        let started = Instant::now();
        assert!(lock.try_acquire_for(Duration::from_millis(50)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn dropping_permit_releases() {
        let lock = ResourceLock::new();
        let permit = lock.acquire();
        assert!(lock.is_held());
        drop(permit);
        assert!(!lock.is_held());
        assert!(lock.try_acquire_for(Duration::from_millis(10)).is_some());
    }

    #[test]
    fn blocked_acquire_wakes_on_release_from_other_thread() {
        let lock = ResourceLock::new();
        let permit = lock.acquire();
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lock = lock.clone();
            thread::spawn(move || {
                let _permit = lock.acquire();
                tx.send(()).ok();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(permit);
        rx.recv_timeout(Duration::from_secs(2))
            .expect("waiter acquires after release");
        waiter.join().expect("waiter thread");
    }

    #[test]
    fn permit_can_move_across_threads() {
        let lock = ResourceLock::new();
        let permit = lock
            .try_acquire_for(Duration::from_millis(10))
            .expect("free lock");
        thread::spawn(move || drop(permit))
            .join()
            .expect("release thread");
        assert!(!lock.is_held());
    }
}
