use std::sync::atomic::{AtomicU64, Ordering};

/// Live pipeline counters, updated by the owner thread and readable from
/// anywhere through [`MirrorStats::snapshot`].
#[derive(Debug, Default)]
pub struct MirrorStats {
    /// Updates handed over by capture threads.
    pub frames_received: AtomicU64,
    /// Updates replayed onto the shared surface.
    pub frames_composited: AtomicU64,
    pub presents: AtomicU64,
    /// Pipeline starts attempted after a recoverable failure.
    pub retries: AtomicU64,
    pub recoverable_errors: AtomicU64,
}

impl MirrorStats {
    pub fn snapshot(&self) -> MirrorStatsSnapshot {
        MirrorStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_composited: self.frames_composited.load(Ordering::Relaxed),
            presents: self.presents.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            recoverable_errors: self.recoverable_errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time copy of [`MirrorStats`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MirrorStatsSnapshot {
    pub frames_received: u64,
    pub frames_composited: u64,
    pub presents: u64,
    pub retries: u64,
    pub recoverable_errors: u64,
}
