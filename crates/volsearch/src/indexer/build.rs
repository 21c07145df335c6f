//! Rebuild state and progress tracking.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Index build state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum IndexBuildState {
    Idle = 0,
    Building = 1,
    Ready = 2,
    Error = 3,
}

impl IndexBuildState {
    pub fn load(atomic: &AtomicU8) -> Self {
        match atomic.load(Ordering::Relaxed) {
            1 => Self::Building,
            2 => Self::Ready,
            3 => Self::Error,
            _ => Self::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

/// Progress counters shared between a running walk and status readers.
#[derive(Debug, Default)]
pub struct IndexBuildProgress {
    pub scanned_files: AtomicUsize,
    pub scanned_dirs: AtomicUsize,
    pub started_at: AtomicU64,
    pub finished_at: AtomicU64,
    pub rescan_count: AtomicU64,
}

impl IndexBuildProgress {
    /// Resets counters for a new build.
    pub fn reset_for_build(&self, started_at: u64) {
        self.scanned_files.store(0, Ordering::Relaxed);
        self.scanned_dirs.store(0, Ordering::Relaxed);
        self.started_at.store(started_at, Ordering::Relaxed);
        self.finished_at.store(0, Ordering::Relaxed);
        self.rescan_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_finished(&self) {
        self.finished_at.store(unix_now_secs(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            scanned_files: self.scanned_files.load(Ordering::Relaxed),
            scanned_dirs: self.scanned_dirs.load(Ordering::Relaxed),
            started_at: zero_to_none(self.started_at.load(Ordering::Relaxed)),
            finished_at: zero_to_none(self.finished_at.load(Ordering::Relaxed)),
            rescan_count: self.rescan_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub scanned_files: usize,
    pub scanned_dirs: usize,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub rescan_count: u64,
}

impl ProgressSnapshot {
    /// Progress line shown under the indexing spinner.
    pub fn describe(&self, volume_name: &str) -> String {
        format!(
            "Indexing {volume_name}: {} files, {} folders",
            self.scanned_files, self.scanned_dirs
        )
    }
}

/// Returns the current Unix timestamp in seconds.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}

pub fn zero_to_none(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_atomic() {
        let atomic = AtomicU8::new(IndexBuildState::Building as u8);
        assert_eq!(IndexBuildState::load(&atomic), IndexBuildState::Building);
        atomic.store(42, Ordering::Relaxed);
        assert_eq!(IndexBuildState::load(&atomic), IndexBuildState::Idle);
    }

    #[test]
    fn reset_clears_counters_and_counts_rescans() {
        let progress = IndexBuildProgress::default();
        progress.scanned_files.store(10, Ordering::Relaxed);
        progress.reset_for_build(100);
        progress.scanned_dirs.fetch_add(2, Ordering::Relaxed);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.scanned_files, 0);
        assert_eq!(snapshot.scanned_dirs, 2);
        assert_eq!(snapshot.started_at, Some(100));
        assert_eq!(snapshot.finished_at, None);
        assert_eq!(snapshot.rescan_count, 1);
        assert_eq!(snapshot.describe("USB"), "Indexing USB: 0 files, 2 folders");
    }
}
