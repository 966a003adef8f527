//! End-to-end scenarios for the collection and inspection pipeline.

use inspection_core::{
    BoundedQueue, Clock, CollectedDataFrame, CollectedSignal, ConditionDef, ExpressionNode,
    InspectionEngine, InspectionMatrix, InspectionStats, InspectionWorker, ManualClock,
    MatrixManager, MonotonicClock, NodeKind, PassThroughMetadata, SampleStore,
    SignalCollectionInfo, SignalType, SignalValue, Timestamp, TriggeredCollectionData,
    WindowFunction,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn signal_info(signal_id: u32) -> SignalCollectionInfo {
    SignalCollectionInfo {
        signal_id,
        sample_buffer_size: 64,
        minimum_sample_interval_ms: 0,
        fixed_window_period_ms: 0,
        condition_only: false,
        signal_type: SignalType::Double,
    }
}

fn condition(root: usize, signals: Vec<SignalCollectionInfo>) -> ConditionDef {
    ConditionDef {
        root,
        minimum_publish_interval_ms: 0,
        after_duration_ms: 0,
        signals,
        can_frames: vec![],
        include_active_dtcs: false,
        trigger_only_on_rising_edge: false,
        metadata: PassThroughMetadata::default(),
    }
}

/// `signal(42) > 10.0`
fn threshold_matrix() -> InspectionMatrix {
    InspectionMatrix {
        conditions: vec![condition(0, vec![signal_info(42)])],
        expression_nodes: vec![
            ExpressionNode::binary(NodeKind::GreaterThan, 1, 2),
            ExpressionNode::signal(42),
            ExpressionNode::number(10.0),
        ],
    }
}

struct Pipeline {
    manager: Arc<MatrixManager>,
    engine: InspectionEngine,
    store: SampleStore,
    publish: BoundedQueue<Arc<TriggeredCollectionData>>,
    stats: Arc<InspectionStats>,
}

impl Pipeline {
    fn new(matrix: InspectionMatrix) -> Self {
        let stats = Arc::new(InspectionStats::new());
        let manager = Arc::new(MatrixManager::new(Arc::clone(&stats)));
        manager.on_change_matrix(matrix).expect("valid matrix");
        Self {
            engine: InspectionEngine::new(Arc::clone(&manager), Arc::clone(&stats)),
            manager,
            store: SampleStore::new(Arc::clone(&stats)),
            publish: BoundedQueue::new(256),
            stats,
        }
    }

    fn ingest(&mut self, signal_id: u32, ts: Timestamp, value: f64) {
        self.store
            .ingest_signal(CollectedSignal::new(signal_id, ts, SignalValue::Double(value)));
    }

    fn tick(&mut self, now: Timestamp) -> usize {
        self.engine.tick(&mut self.store, now, &self.publish)
    }
}

#[test]
fn threshold_condition_fires_with_buffered_history() {
    let mut p = Pipeline::new(threshold_matrix());
    p.tick(0);

    p.ingest(42, 1, 5.0);
    assert_eq!(p.tick(1), 0);

    p.ingest(42, 2, 15.0);
    assert_eq!(p.tick(2), 1);

    let data = p.publish.pop().expect("trigger");
    assert_eq!(data.trigger_time, 2);
    assert_eq!(
        data.signals
            .iter()
            .map(|s| (s.receive_time, s.value.as_f64()))
            .collect::<Vec<_>>(),
        vec![(1, 5.0), (2, 15.0)]
    );

    // Still above threshold: without a rising-edge gate the next tick fires
    // again with the grown history.
    p.ingest(42, 3, 20.0);
    assert_eq!(p.tick(3), 1);
    let data = p.publish.pop().expect("trigger");
    assert_eq!(data.signals.len(), 3);
}

#[test]
fn rising_edge_condition_fires_only_on_transitions() {
    let mut matrix = threshold_matrix();
    matrix.conditions[0].trigger_only_on_rising_edge = true;
    let mut p = Pipeline::new(matrix);
    p.tick(0);

    let mut fired_at = Vec::new();
    for (ts, value) in [(1, 5.0), (2, 15.0), (3, 20.0), (4, 8.0), (5, 25.0)] {
        p.ingest(42, ts, value);
        if p.tick(ts) > 0 {
            fired_at.push(ts);
        }
    }

    assert_eq!(fired_at, vec![2, 5]);
}

#[test]
fn minimum_publish_interval_spaces_triggers() {
    let matrix = InspectionMatrix {
        conditions: vec![ConditionDef {
            minimum_publish_interval_ms: 1000,
            ..condition(0, vec![])
        }],
        expression_nodes: vec![ExpressionNode::boolean(true)],
    };
    let mut p = Pipeline::new(matrix);

    let clock = ManualClock::new(0);
    let mut fired_at = Vec::new();
    while clock.now_ms() < 2500 {
        if p.tick(clock.now_ms()) > 0 {
            fired_at.push(clock.now_ms());
        }
        clock.advance(1);
    }

    assert_eq!(fired_at, vec![0, 1000, 2000]);

    // Trigger times differ by at least the configured interval.
    let mut trigger_times = Vec::new();
    p.publish.drain(|data| trigger_times.push(data.trigger_time));
    for pair in trigger_times.windows(2) {
        assert!(pair[1] - pair[0] >= 1000);
    }
}

#[test]
fn window_aggregate_condition() {
    // LAST_WINDOW_MAX(signal 7, 100 ms) > 50
    let matrix = InspectionMatrix {
        conditions: vec![condition(0, vec![signal_info(7)])],
        expression_nodes: vec![
            ExpressionNode::binary(NodeKind::GreaterThan, 1, 2),
            ExpressionNode::window(7, WindowFunction::LastWindowMax, 100),
            ExpressionNode::number(50.0),
        ],
    };
    let mut p = Pipeline::new(matrix);
    p.tick(0);

    // Ramp: value = ts / 4, peaking at 50 for ts = 200. The max never
    // exceeds the threshold, so nothing fires.
    for ts in (0..=200).step_by(10) {
        p.ingest(7, ts, ts as f64 / 4.0);
        assert_eq!(p.tick(ts), 0, "no trigger expected at ts={ts}");
    }

    // One sample above the threshold enters the trailing window.
    p.ingest(7, 210, 52.5);
    assert_eq!(p.tick(210), 1);

    // Once every sample above 50 ages out of the window, the condition goes
    // false again (window (250, 350] holds nothing).
    assert_eq!(p.tick(350), 0);
}

#[test]
fn previous_window_aggregate_lags_by_one_period() {
    // PREV_LAST_WINDOW_AVG(signal 7, 100 ms) > 10
    let matrix = InspectionMatrix {
        conditions: vec![condition(0, vec![signal_info(7)])],
        expression_nodes: vec![
            ExpressionNode::binary(NodeKind::GreaterThan, 1, 2),
            ExpressionNode::window(7, WindowFunction::PrevLastWindowAvg, 100),
            ExpressionNode::number(10.0),
        ],
    };
    let mut p = Pipeline::new(matrix);
    p.tick(0);

    p.ingest(7, 50, 20.0);
    // At t=100 the sample is in the current window, not the previous one.
    assert_eq!(p.tick(100), 0);
    // At t=200 the window (0, 100] is the previous one and holds the sample.
    assert_eq!(p.tick(200), 1);
}

#[test]
fn matrix_swap_preserves_samples_of_kept_signals() {
    let mut p = Pipeline::new(threshold_matrix());
    p.tick(0);
    p.ingest(42, 1, 5.0);

    // Swap in a matrix with a lower threshold for the same signal.
    let lowered = InspectionMatrix {
        conditions: vec![condition(0, vec![signal_info(42)])],
        expression_nodes: vec![
            ExpressionNode::binary(NodeKind::GreaterThan, 1, 2),
            ExpressionNode::signal(42),
            ExpressionNode::number(2.0),
        ],
    };
    p.manager.on_change_matrix(lowered).expect("valid matrix");

    // The buffered sample (value 5) satisfies the new threshold at once.
    assert_eq!(p.tick(2), 1);
    let data = p.publish.pop().expect("trigger");
    assert_eq!(data.signals.len(), 1);
    assert_eq!(data.signals[0].receive_time, 1);
    assert_eq!(p.stats.snapshot().matrix_swaps, 2);
}

#[test]
fn invalid_matrix_keeps_previous_one_running() {
    let mut p = Pipeline::new(threshold_matrix());
    p.tick(0);

    // Unresolved signal reference: staging fails.
    let mut broken = threshold_matrix();
    broken.conditions[0].signals.clear();
    assert!(p.manager.on_change_matrix(broken).is_err());

    // The original threshold condition still evaluates and fires.
    p.ingest(42, 1, 15.0);
    assert_eq!(p.tick(1), 1);
    assert_eq!(p.stats.snapshot().matrix_rejections, 1);
}

#[test]
fn rejected_samples_do_not_reach_snapshots() {
    let mut matrix = threshold_matrix();
    matrix.conditions[0].signals[0].minimum_sample_interval_ms = 10;
    let mut p = Pipeline::new(matrix);
    p.tick(0);

    p.ingest(42, 0, 11.0);
    p.ingest(42, 5, 12.0); // under the interval, dropped
    p.ingest(42, 3, 13.0); // non-monotone, dropped
    p.ingest(42, 10, 14.0);

    assert_eq!(p.tick(10), 1);
    let data = p.publish.pop().expect("trigger");
    assert_eq!(
        data.signals
            .iter()
            .map(|s| s.receive_time)
            .collect::<Vec<_>>(),
        vec![0, 10]
    );
    assert_eq!(p.stats.snapshot().samples_rejected, 2);
}

#[test]
fn worker_pipeline_end_to_end() {
    let _ = tracing_subscriber::fmt::try_init();

    let stats = Arc::new(InspectionStats::new());
    let manager = Arc::new(MatrixManager::new(Arc::clone(&stats)));
    manager
        .on_change_matrix(threshold_matrix())
        .expect("valid matrix");

    let ingress = Arc::new(BoundedQueue::new(1024));
    let publish = Arc::new(BoundedQueue::new(64));
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let mut worker = InspectionWorker::new(
        Arc::clone(&ingress),
        Arc::clone(&publish),
        manager,
        Arc::clone(&stats),
        Arc::clone(&clock),
        10,
    );
    worker.start().expect("start");

    let now = clock.now_ms();
    ingress.push(CollectedDataFrame::from_signals(vec![CollectedSignal::new(
        42,
        now,
        SignalValue::Double(80.0),
    )]));
    worker.on_new_data_available();

    let deadline = Instant::now() + Duration::from_secs(2);
    while publish.is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }

    let data = publish.pop().expect("trigger from worker");
    assert_eq!(data.signals.len(), 1);
    assert_eq!(data.signals[0].value.as_f64(), 80.0);
    assert!(worker.is_alive());

    worker.stop().expect("stop");
    assert!(stats.snapshot().ticks > 0);
}
