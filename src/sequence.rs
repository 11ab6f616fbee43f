//! Sequence guard for open attempts.
//!
//! Every open attempt takes a fresh `OpSeq`. Completions carry the token of the
//! attempt that issued them, and the session acts on a completion only while its
//! token is still current.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one open attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpSeq(u64);

impl OpSeq {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OpSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic operation counter.
///
/// Every open attempt takes a fresh sequence number. A completion carrying any
/// other number belongs to a superseded attempt and must be discarded.
#[derive(Debug, Default)]
pub struct SequenceGuard {
    current: AtomicU64,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new attempt, invalidating every earlier sequence number.
    pub fn advance(&self) -> OpSeq {
        OpSeq(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn current(&self) -> OpSeq {
        OpSeq(self.current.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, seq: OpSeq) -> bool {
        self.current() == seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_strictly_increasing() {
        let guard = SequenceGuard::new();
        let first = guard.advance();
        let second = guard.advance();
        assert!(second > first);
        assert_eq!(guard.current(), second);
    }

    #[test]
    fn superseded_sequence_is_stale() {
        let guard = SequenceGuard::new();
        let first = guard.advance();
        assert!(guard.is_current(first));
        let second = guard.advance();
        assert!(!guard.is_current(first));
        assert!(guard.is_current(second));
    }
}
