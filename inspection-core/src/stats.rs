//! Engine statistics counters.
//!
//! Shared atomic counters incremented on the worker thread and snapshotted by
//! the health/telemetry layer. Data errors (rejected samples, dropped
//! triggers) are counted here instead of surfacing as failures.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for the collection and inspection pipeline.
#[derive(Debug, Default)]
pub struct InspectionStats {
    /// Signal samples accepted into the store
    pub samples_ingested: AtomicU64,

    /// Signal samples dropped (unknown id, non-monotone, under interval)
    pub samples_rejected: AtomicU64,

    /// Raw CAN frames accepted into the store
    pub frames_ingested: AtomicU64,

    /// Raw CAN frames dropped
    pub frames_rejected: AtomicU64,

    /// Triggers pushed to the publish queue
    pub triggers_fired: AtomicU64,

    /// Triggers dropped because the publish queue was full
    pub triggers_dropped: AtomicU64,

    /// Matrices adopted by the engine
    pub matrix_swaps: AtomicU64,

    /// Matrices refused at validation
    pub matrix_rejections: AtomicU64,

    /// Evaluation ticks completed
    pub ticks: AtomicU64,
}

impl InspectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a consistent-enough snapshot for reporting. Counters are read
    /// individually with relaxed ordering; small skews between fields are
    /// acceptable for telemetry.
    pub fn snapshot(&self) -> InspectionStatsSnapshot {
        InspectionStatsSnapshot {
            samples_ingested: self.samples_ingested.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            triggers_fired: self.triggers_fired.load(Ordering::Relaxed),
            triggers_dropped: self.triggers_dropped.load(Ordering::Relaxed),
            matrix_swaps: self.matrix_swaps.load(Ordering::Relaxed),
            matrix_rejections: self.matrix_rejections.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`InspectionStats`] for serialization and reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionStatsSnapshot {
    pub samples_ingested: u64,
    pub samples_rejected: u64,
    pub frames_ingested: u64,
    pub frames_rejected: u64,
    pub triggers_fired: u64,
    pub triggers_dropped: u64,
    pub matrix_swaps: u64,
    pub matrix_rejections: u64,
    pub ticks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = InspectionStats::new();
        stats.samples_ingested.fetch_add(3, Ordering::Relaxed);
        stats.triggers_fired.fetch_add(1, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_ingested, 3);
        assert_eq!(snapshot.triggers_fired, 1);
        assert_eq!(snapshot.samples_rejected, 0);
    }
}
