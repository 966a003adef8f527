//! Inspection worker thread.
//!
//! A single dedicated thread owns the sample store and the trigger engine.
//! Producers push [`CollectedDataFrame`]s onto the ingress queue from their
//! own threads and nudge the worker through [`InspectionWorker::on_new_data_available`];
//! the worker drains, evaluates, and pushes triggers to the publish queue.
//! Shutdown is cooperative: set the stop flag, wake the thread, join.

use crate::clock::Clock;
use crate::config::InspectionConfig;
use crate::engine::InspectionEngine;
use crate::manager::MatrixManager;
use crate::queue::BoundedQueue;
use crate::stats::InspectionStats;
use crate::store::SampleStore;
use crate::types::{CollectedDataFrame, Timestamp, TriggeredCollectionData, EVALUATE_INTERVAL_MS};
use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// Condvar-backed wake signal with coalescing.
///
/// Multiple notifications before the worker wakes collapse into one wakeup;
/// a notification arriving while the worker is mid-loop is not lost.
#[derive(Debug, Default)]
struct WakeSignal {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    fn notify(&self) {
        let mut notified = self.notified.lock().expect("wake signal mutex poisoned");
        *notified = true;
        self.condvar.notify_one();
    }

    /// Waits until notified or `timeout` elapses, then clears the flag.
    fn wait_timeout(&self, timeout: Duration) {
        let mut notified = self.notified.lock().expect("wake signal mutex poisoned");
        if !*notified {
            let (guard, _) = self
                .condvar
                .wait_timeout(notified, timeout)
                .expect("wake signal mutex poisoned");
            notified = guard;
        }
        *notified = false;
    }
}

/// State shared between the worker thread and its handle.
struct WorkerShared {
    ingress: Arc<BoundedQueue<CollectedDataFrame>>,
    publish: Arc<BoundedQueue<Arc<TriggeredCollectionData>>>,
    matrix_manager: Arc<MatrixManager>,
    stats: Arc<InspectionStats>,
    clock: Arc<dyn Clock>,
    wake: WakeSignal,
    should_stop: AtomicBool,
    /// Completion time of the most recent tick; `i64::MIN` before the first.
    last_tick: AtomicI64,
    idle_time_ms: u64,
}

/// Handle owning the inspection worker thread.
pub struct InspectionWorker {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

impl InspectionWorker {
    /// Creates a stopped worker wired to its queues.
    pub fn new(
        ingress: Arc<BoundedQueue<CollectedDataFrame>>,
        publish: Arc<BoundedQueue<Arc<TriggeredCollectionData>>>,
        matrix_manager: Arc<MatrixManager>,
        stats: Arc<InspectionStats>,
        clock: Arc<dyn Clock>,
        idle_time_ms: u64,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                ingress,
                publish,
                matrix_manager,
                stats,
                clock,
                wake: WakeSignal::default(),
                should_stop: AtomicBool::new(false),
                last_tick: AtomicI64::new(i64::MIN),
                idle_time_ms,
            }),
            handle: None,
        }
    }

    /// Creates a stopped worker with queues sized from the configuration.
    /// Producers and the upload path reach the queues through
    /// [`InspectionWorker::ingress`] and [`InspectionWorker::publish`].
    pub fn from_config(
        config: &InspectionConfig,
        matrix_manager: Arc<MatrixManager>,
        stats: Arc<InspectionStats>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            Arc::new(BoundedQueue::new(config.signal_queue_capacity)),
            Arc::new(BoundedQueue::new(config.publish_queue_capacity)),
            matrix_manager,
            stats,
            clock,
            config.idle_time_ms,
        )
    }

    /// The ingress queue producers push collected data frames into.
    pub fn ingress(&self) -> &Arc<BoundedQueue<CollectedDataFrame>> {
        &self.shared.ingress
    }

    /// The publish queue the upload path drains triggered data from.
    pub fn publish(&self) -> &Arc<BoundedQueue<Arc<TriggeredCollectionData>>> {
        &self.shared.publish
    }

    /// Spawns the worker thread.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            bail!("inspection worker already running");
        }
        self.shared.should_stop.store(false, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("inspection-worker".to_string())
            .spawn(move || run_loop(&shared))
            .context("failed to spawn inspection worker thread")?;
        self.handle = Some(handle);
        info!("inspection worker started");
        Ok(())
    }

    /// Signals the worker to stop and joins it.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.shared.should_stop.store(true, Ordering::Release);
        self.shared.wake.notify();
        if handle.join().is_err() {
            bail!("inspection worker thread panicked");
        }
        info!("inspection worker stopped");
        Ok(())
    }

    /// Wakes the worker; callers invoke this after pushing to the ingress
    /// queue. Idempotent and cheap.
    pub fn on_new_data_available(&self) {
        self.shared.wake.notify();
    }

    /// True when the worker completed a tick within the last
    /// `5 × idle_time_ms`.
    pub fn is_alive(&self) -> bool {
        if self.handle.is_none() {
            return false;
        }
        let last_tick = self.shared.last_tick.load(Ordering::Acquire);
        if last_tick == i64::MIN {
            return false;
        }
        let now = self.shared.clock.now_ms();
        now.saturating_sub(last_tick) <= 5 * self.idle_time_ms() as i64
    }

    /// Configured idle timeout in milliseconds.
    pub fn idle_time_ms(&self) -> u64 {
        self.shared.idle_time_ms
    }
}

impl Drop for InspectionWorker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn run_loop(shared: &WorkerShared) {
    let mut store = SampleStore::new(Arc::clone(&shared.stats));
    let mut engine = InspectionEngine::new(
        Arc::clone(&shared.matrix_manager),
        Arc::clone(&shared.stats),
    );
    let mut last_evaluation: Option<Timestamp> = None;
    let idle = Duration::from_millis(shared.idle_time_ms);

    loop {
        if shared.should_stop.load(Ordering::Acquire) {
            break;
        }
        shared.wake.wait_timeout(idle);
        if shared.should_stop.load(Ordering::Acquire) {
            break;
        }

        let drained = shared.ingress.drain(|frame| route_frame(&mut store, frame));
        if drained > 0 {
            debug!(frames = drained, "drained ingress queue");
        }

        let now = shared.clock.now_ms();
        if last_evaluation.map_or(true, |last| now - last >= EVALUATE_INTERVAL_MS) {
            engine.tick(&mut store, now, &shared.publish);
            last_evaluation = Some(now);
            shared.last_tick.store(now, Ordering::Release);
        }
    }
}

fn route_frame(store: &mut SampleStore, frame: CollectedDataFrame) {
    for signal in frame.signals {
        store.ingest_signal(signal);
    }
    if let Some(raw) = frame.raw_can_frame {
        store.ingest_frame(raw);
    }
    if let Some(dtcs) = frame.active_dtcs {
        store.set_dtcs(dtcs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::matrix::{ConditionDef, ExpressionNode, InspectionMatrix, NodeKind, SignalCollectionInfo};
    use crate::types::{CollectedSignal, PassThroughMetadata, SignalType, SignalValue};
    use std::time::Instant;

    fn threshold_matrix() -> InspectionMatrix {
        InspectionMatrix {
            conditions: vec![ConditionDef {
                root: 0,
                minimum_publish_interval_ms: 0,
                after_duration_ms: 0,
                signals: vec![SignalCollectionInfo {
                    signal_id: 42,
                    sample_buffer_size: 16,
                    minimum_sample_interval_ms: 0,
                    fixed_window_period_ms: 0,
                    condition_only: false,
                    signal_type: SignalType::Double,
                }],
                can_frames: vec![],
                include_active_dtcs: false,
                trigger_only_on_rising_edge: true,
                metadata: PassThroughMetadata::default(),
            }],
            expression_nodes: vec![
                ExpressionNode::binary(NodeKind::GreaterThan, 1, 2),
                ExpressionNode::signal(42),
                ExpressionNode::number(10.0),
            ],
        }
    }

    fn build_worker() -> (
        InspectionWorker,
        Arc<BoundedQueue<CollectedDataFrame>>,
        Arc<BoundedQueue<Arc<TriggeredCollectionData>>>,
        Arc<dyn Clock>,
    ) {
        let stats = Arc::new(InspectionStats::new());
        let manager = Arc::new(MatrixManager::new(Arc::clone(&stats)));
        manager
            .on_change_matrix(threshold_matrix())
            .expect("valid matrix");

        let ingress = Arc::new(BoundedQueue::new(128));
        let publish = Arc::new(BoundedQueue::new(16));
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let worker = InspectionWorker::new(
            Arc::clone(&ingress),
            Arc::clone(&publish),
            manager,
            stats,
            Arc::clone(&clock),
            10,
        );
        (worker, ingress, publish, clock)
    }

    fn wait_for<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        predicate()
    }

    #[test]
    fn test_worker_end_to_end_trigger() {
        let (mut worker, ingress, publish, clock) = build_worker();
        worker.start().expect("start");

        let now = clock.now_ms();
        ingress.push(CollectedDataFrame::from_signals(vec![
            CollectedSignal::new(42, now, SignalValue::Double(99.0)),
        ]));
        worker.on_new_data_available();

        assert!(
            wait_for(|| !publish.is_empty(), Duration::from_secs(2)),
            "expected a trigger on the publish queue"
        );
        let data = publish.pop().expect("trigger");
        assert_eq!(data.signals.len(), 1);
        assert_eq!(data.signals[0].signal_id, 42);

        assert!(worker.is_alive());
        worker.stop().expect("stop");
        assert!(!worker.is_alive());
    }

    #[test]
    fn test_worker_double_start_fails() {
        let (mut worker, _ingress, _publish, _clock) = build_worker();
        worker.start().expect("start");
        assert!(worker.start().is_err());
        worker.stop().expect("stop");
    }

    #[test]
    fn test_worker_stop_is_idempotent() {
        let (mut worker, _ingress, _publish, _clock) = build_worker();
        worker.start().expect("start");
        worker.stop().expect("stop");
        worker.stop().expect("second stop is a no-op");
    }

    #[test]
    fn test_from_config_sizes_queues() {
        let stats = Arc::new(InspectionStats::new());
        let manager = Arc::new(MatrixManager::new(Arc::clone(&stats)));
        let config = InspectionConfig::new()
            .with_signal_queue_capacity(32)
            .with_publish_queue_capacity(8)
            .with_idle_time_ms(25);

        let worker = InspectionWorker::from_config(
            &config,
            manager,
            stats,
            Arc::new(MonotonicClock::new()),
        );
        assert_eq!(worker.ingress().capacity(), 32);
        assert_eq!(worker.publish().capacity(), 8);
        assert_eq!(worker.idle_time_ms(), 25);
    }

    #[test]
    fn test_worker_ticks_on_idle_timer_without_wakeups() {
        let (mut worker, _ingress, _publish, _clock) = build_worker();
        worker.start().expect("start");

        // No data and no wakeups: the idle timer alone must keep it alive.
        assert!(
            wait_for(|| worker.is_alive(), Duration::from_secs(2)),
            "worker should tick from the idle timer"
        );
        worker.stop().expect("stop");
    }
}
