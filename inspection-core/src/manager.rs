//! Staging and atomic handoff of inspection matrices.
//!
//! The schema thread stages a validated matrix here; the inspection worker
//! adopts it at the start of its next evaluation tick. A rejected matrix
//! never reaches the slot, so the engine keeps running the previous one.

use crate::matrix::{InspectionMatrix, MatrixError};
use crate::stats::InspectionStats;
use crate::types::MAX_NUMBER_OF_ACTIVE_CONDITIONS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// One-producer one-consumer handoff slot for the active matrix.
#[derive(Debug)]
pub struct MatrixManager {
    pending: Mutex<Option<Arc<InspectionMatrix>>>,
    dirty: AtomicBool,
    stats: Arc<InspectionStats>,
}

impl MatrixManager {
    pub fn new(stats: Arc<InspectionStats>) -> Self {
        Self {
            pending: Mutex::new(None),
            dirty: AtomicBool::new(false),
            stats,
        }
    }

    /// Validates and stages a new matrix for adoption at the next tick.
    ///
    /// Conditions beyond the active-condition limit are dropped with a
    /// warning before validation. On validation failure the previously
    /// active matrix keeps running and the error is returned for the
    /// schema layer to report.
    pub fn on_change_matrix(&self, mut matrix: InspectionMatrix) -> Result<(), MatrixError> {
        if matrix.conditions.len() > MAX_NUMBER_OF_ACTIVE_CONDITIONS {
            warn!(
                staged = matrix.conditions.len(),
                limit = MAX_NUMBER_OF_ACTIVE_CONDITIONS,
                "dropping conditions beyond the active limit"
            );
            matrix.conditions.truncate(MAX_NUMBER_OF_ACTIVE_CONDITIONS);
        }

        if let Err(error) = matrix.validate() {
            self.stats.matrix_rejections.fetch_add(1, Ordering::Relaxed);
            warn!(%error, "inspection matrix rejected");
            return Err(error);
        }

        let conditions = matrix.conditions.len();
        let signals = matrix.distinct_signal_count();
        {
            let mut pending = self.pending.lock().expect("matrix slot mutex poisoned");
            *pending = Some(Arc::new(matrix));
        }
        self.dirty.store(true, Ordering::Release);
        info!(conditions, signals, "inspection matrix staged");
        Ok(())
    }

    /// True when a staged matrix awaits adoption.
    pub fn has_pending(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Takes the staged matrix, clearing the dirty flag.
    ///
    /// Called by the worker at tick start; repeated staging before a take
    /// keeps only the newest matrix.
    pub fn take_pending(&self) -> Option<Arc<InspectionMatrix>> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.pending
            .lock()
            .expect("matrix slot mutex poisoned")
            .take()
    }
}
