//! Progress reporting and abort control for a collection pass.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Phase of a collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GcPhase {
    /// Not started.
    Idle,
    /// Walking branch heads.
    Marking,
    /// Removing unreachable objects.
    Sweeping,
    /// Finished.
    Done,
    /// Stopped by [`GcHandle::abort`].
    Aborted,
    /// Stopped by an error; nothing further was removed.
    Failed,
}

impl GcPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => GcPhase::Marking,
            2 => GcPhase::Sweeping,
            3 => GcPhase::Done,
            4 => GcPhase::Aborted,
            5 => GcPhase::Failed,
            _ => GcPhase::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            GcPhase::Idle => 0,
            GcPhase::Marking => 1,
            GcPhase::Sweeping => 2,
            GcPhase::Done => 3,
            GcPhase::Aborted => 4,
            GcPhase::Failed => 5,
        }
    }
}

impl fmt::Display for GcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GcPhase::Idle => "idle",
            GcPhase::Marking => "marking",
            GcPhase::Sweeping => "sweeping",
            GcPhase::Done => "done",
            GcPhase::Aborted => "aborted",
            GcPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a pass's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GcProgress {
    /// Current phase.
    pub phase: GcPhase,
    /// Objects examined by the sweep so far.
    pub processed: u64,
    /// Objects the sweep will examine.
    pub total: u64,
    /// Objects removed (or that would be, on a dry run).
    pub removed: u64,
}

impl GcProgress {
    /// Sweep completion as a percentage.
    pub fn percent(&self) -> f64 {
        match self.phase {
            GcPhase::Done => 100.0,
            GcPhase::Idle | GcPhase::Marking => 0.0,
            _ if self.total == 0 => 100.0,
            _ => self.processed as f64 * 100.0 / self.total as f64,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    phase: AtomicU8,
    processed: AtomicU64,
    total: AtomicU64,
    removed: AtomicU64,
    abort: AtomicBool,
}

/// Cloneable handle for observing and aborting a pass from another thread.
#[derive(Debug, Clone, Default)]
pub struct GcHandle {
    shared: Arc<Shared>,
}

impl GcHandle {
    /// Returns the current progress.
    pub fn progress(&self) -> GcProgress {
        GcProgress {
            phase: GcPhase::from_u8(self.shared.phase.load(Ordering::Acquire)),
            processed: self.shared.processed.load(Ordering::Relaxed),
            total: self.shared.total.load(Ordering::Relaxed),
            removed: self.shared.removed.load(Ordering::Relaxed),
        }
    }

    /// Asks the pass to stop after the object it is examining.
    pub fn abort(&self) {
        self.shared.abort.store(true, Ordering::Release);
    }

    pub(crate) fn abort_requested(&self) -> bool {
        self.shared.abort.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.shared.abort.store(false, Ordering::Release);
        self.shared.processed.store(0, Ordering::Relaxed);
        self.shared.total.store(0, Ordering::Relaxed);
        self.shared.removed.store(0, Ordering::Relaxed);
        self.set_phase(GcPhase::Idle);
    }

    pub(crate) fn set_phase(&self, phase: GcPhase) {
        self.shared.phase.store(phase.as_u8(), Ordering::Release);
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.shared.total.store(total, Ordering::Relaxed);
    }

    pub(crate) fn add_processed(&self, n: u64) {
        self.shared.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_removed(&self, n: u64) {
        self.shared.removed.fetch_add(n, Ordering::Relaxed);
    }
}
