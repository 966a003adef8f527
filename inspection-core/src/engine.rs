//! Trigger engine: evaluates conditions and assembles triggered data.
//!
//! One tick evaluates every condition of the active matrix in registration
//! order against the sample store, applies the rising-edge,
//! minimum-publish-interval, and after-duration gates, and pushes assembled
//! [`TriggeredCollectionData`] onto the publish queue. A tick observes
//! exactly one matrix version: a staged matrix is adopted only at tick
//! start.

use crate::eval::evaluate;
use crate::manager::MatrixManager;
use crate::matrix::InspectionMatrix;
use crate::queue::BoundedQueue;
use crate::stats::InspectionStats;
use crate::store::SampleStore;
use crate::types::{EventId, Timestamp, TriggeredCollectionData};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Evaluation state carried per condition across ticks.
#[derive(Debug, Clone, Default)]
struct ConditionState {
    /// Result of the previous evaluation, for rising-edge detection
    last_eval: bool,

    /// Timestamp of the last successful trigger
    last_trigger: Option<Timestamp>,

    /// Deadline armed by a non-zero after-duration
    pending_after: Option<Timestamp>,
}

/// The inspection engine core. Owned exclusively by the worker thread.
pub struct InspectionEngine {
    matrix_manager: Arc<MatrixManager>,
    active_matrix: Option<Arc<InspectionMatrix>>,
    condition_states: Vec<ConditionState>,
    next_event_id: EventId,
    stats: Arc<InspectionStats>,
}

impl InspectionEngine {
    pub fn new(matrix_manager: Arc<MatrixManager>, stats: Arc<InspectionStats>) -> Self {
        Self {
            matrix_manager,
            active_matrix: None,
            condition_states: Vec::new(),
            next_event_id: 1,
            stats,
        }
    }

    /// The matrix currently being evaluated, if any.
    pub fn active_matrix(&self) -> Option<&Arc<InspectionMatrix>> {
        self.active_matrix.as_ref()
    }

    /// Runs one evaluation tick at `now`.
    ///
    /// Returns the number of triggers pushed to the publish queue.
    pub fn tick(
        &mut self,
        store: &mut SampleStore,
        now: Timestamp,
        publish_queue: &BoundedQueue<Arc<TriggeredCollectionData>>,
    ) -> usize {
        if let Some(matrix) = self.matrix_manager.take_pending() {
            store.reshape(&matrix);
            self.condition_states = vec![ConditionState::default(); matrix.conditions.len()];
            info!(conditions = matrix.conditions.len(), "inspection matrix adopted");
            self.active_matrix = Some(matrix);
            self.stats.matrix_swaps.fetch_add(1, Ordering::Relaxed);
        }

        let Some(matrix) = self.active_matrix.clone() else {
            self.stats.ticks.fetch_add(1, Ordering::Relaxed);
            return 0;
        };

        let mut fired = 0;
        for (index, condition) in matrix.conditions.iter().enumerate() {
            let evaluated =
                evaluate(&matrix.expression_nodes, condition.root, store, now).truthy();
            let state = &mut self.condition_states[index];

            if condition.trigger_only_on_rising_edge && state.last_eval {
                // Still true (or just turned false): no edge to fire on.
                state.last_eval = evaluated;
                if !evaluated {
                    state.pending_after = None;
                }
                continue;
            }

            if !evaluated {
                state.last_eval = false;
                state.pending_after = None;
                continue;
            }
            state.last_eval = true;

            if let Some(last) = state.last_trigger {
                if now - last < i64::from(condition.minimum_publish_interval_ms) {
                    continue;
                }
            }

            if condition.after_duration_ms > 0 && state.pending_after.is_none() {
                state.pending_after = Some(now + i64::from(condition.after_duration_ms));
                continue;
            }
            if let Some(deadline) = state.pending_after {
                if now < deadline {
                    continue;
                }
            }
            state.pending_after = None;

            let (signals, can_frames, active_dtcs) = store.snapshot_for(condition, now);
            let event_id = self.next_event_id;
            self.next_event_id = self.next_event_id.wrapping_add(1);
            let data = Arc::new(TriggeredCollectionData {
                metadata: condition.metadata.clone(),
                trigger_time: now,
                signals,
                can_frames,
                active_dtcs,
                event_id,
            });

            if publish_queue.push(data) {
                // The publish interval is consumed only by a delivered trigger.
                state.last_trigger = Some(now);
                fired += 1;
                self.stats.triggers_fired.fetch_add(1, Ordering::Relaxed);
                debug!(event_id, condition = index, trigger_time = now, "condition fired");
            } else {
                self.stats.triggers_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_id,
                    condition = index,
                    "publish queue full, trigger dropped"
                );
            }
        }

        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        fired
    }
}
