//! Generation-based cancellation for scans and result computations.
//!
//! A [`GenerationTracker`] hands out monotonically increasing versions. Each
//! long-running operation holds a [`CancellationToken`] bound to the version
//! that was active when it started; bumping the tracker cancels every token
//! issued for an older version.
//!
//! ## Sparse Checking
//!
//! Walks and scoring loops touch hundreds of thousands of entries, so
//! `is_cancelled_sparse()` only loads the atomic every
//! [`CANCEL_CHECK_INTERVAL`] iterations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How often long-running loops should check whether execution was cancelled.
/// Power of 2 so the modulo is a bitwise AND.
pub const CANCEL_CHECK_INTERVAL: usize = 0x400; // 1,024

/// Tracks the active generation of a cancellable operation.
#[derive(Debug, Clone, Default)]
pub struct GenerationTracker {
    active: Arc<AtomicU64>,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the active generation and returns it.
    ///
    /// Every token issued for an older generation reports cancelled afterwards.
    pub fn next_version(&self) -> u64 {
        self.active.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the current active generation without incrementing.
    pub fn current_version(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Starts a new generation and returns a token bound to it.
    pub fn begin(&self) -> CancellationToken {
        let version = self.next_version();
        self.token_for_version(version)
    }

    /// Cancels whatever generation is currently running.
    pub fn cancel(&self) {
        self.next_version();
    }

    /// Creates a token for the given generation.
    pub fn token_for_version(&self, version: u64) -> CancellationToken {
        CancellationToken {
            active: Some(self.active.clone()),
            version,
        }
    }

    /// Returns true if `version` is still the active generation.
    pub fn is_current(&self, version: u64) -> bool {
        self.current_version() == version
    }
}

/// A cancellation token for terminating long-running operations.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    /// `None` for tokens that can never be cancelled.
    active: Option<Arc<AtomicU64>>,
    version: u64,
}

impl CancellationToken {
    /// Creates a cancellation token that is never cancelled.
    #[inline]
    pub fn noop() -> Self {
        Self::default()
    }

    /// The generation this token was created with.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Checks if this token is still active.
    ///
    /// Returns `Some(())` if still active, `None` if cancelled, so callers can
    /// bail out with `?`.
    #[inline]
    pub fn is_cancelled(&self) -> Option<()> {
        match &self.active {
            Some(active) if active.load(Ordering::Relaxed) != self.version => None,
            _ => Some(()),
        }
    }

    /// Sparse check, only loads the atomic every `CANCEL_CHECK_INTERVAL` calls.
    #[inline]
    pub fn is_cancelled_sparse(&self, counter: usize) -> Option<()> {
        if counter & (CANCEL_CHECK_INTERVAL - 1) == 0 {
            self.is_cancelled()
        } else {
            Some(())
        }
    }

    /// Boolean form of [`Self::is_cancelled`].
    #[inline]
    pub fn cancelled(&self) -> bool {
        self.is_cancelled().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_token_is_never_cancelled() {
        let token = CancellationToken::noop();
        assert!(token.is_cancelled().is_some());
        assert!(!token.cancelled());
    }

    #[test]
    fn newer_generation_cancels_older_tokens() {
        let tracker = GenerationTracker::new();
        let first = tracker.begin();
        assert!(!first.cancelled());

        let second = tracker.begin();
        assert!(first.cancelled());
        assert!(!second.cancelled());

        tracker.cancel();
        assert!(second.cancelled());
    }

    #[test]
    fn sparse_check_skips_between_intervals() {
        let tracker = GenerationTracker::new();
        let token = tracker.begin();
        tracker.cancel();

        assert!(token.is_cancelled_sparse(1).is_some());
        assert!(token.is_cancelled_sparse(CANCEL_CHECK_INTERVAL).is_none());
    }

    #[test]
    fn clones_share_the_same_generation() {
        let tracker = GenerationTracker::new();
        let clone = tracker.clone();
        let token = tracker.begin();
        clone.cancel();
        assert!(token.cancelled());
        assert!(!tracker.is_current(token.version()));
    }
}
