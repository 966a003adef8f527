//! In-memory sample store.
//!
//! Holds the sliding window of recent samples the trigger engine evaluates
//! against: one ring buffer per configured signal, one per configured raw CAN
//! frame, and a single most-recent-wins slot for the active-DTC snapshot.
//! The store is owned exclusively by the inspection worker thread; producers
//! reach it only through the ingress queue.

use crate::matrix::{ConditionDef, InspectionMatrix, WindowFunction};
use crate::stats::InspectionStats;
use crate::types::{
    CanFrameId, ChannelId, CollectedCanRawFrame, CollectedSignal, DtcSnapshot, SignalId,
    SignalValue, Timestamp,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

/// Fixed-capacity ring buffer; the oldest element is evicted on overflow.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer holding at most `capacity` elements. Callers are
    /// expected to have validated `capacity >= 1`.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an element, evicting the oldest when full.
    pub fn push(&mut self, element: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(element);
    }

    /// Shrinks or grows the capacity, keeping the most recent elements.
    pub fn set_capacity(&mut self, capacity: usize) {
        while self.buf.len() > capacity {
            self.buf.pop_front();
        }
        self.capacity = capacity;
    }

    /// Oldest-to-newest iteration.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }

    /// Most recently pushed element.
    pub fn newest(&self) -> Option<&T> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Per-signal buffer with its admission policy.
#[derive(Debug)]
struct SignalBuffer {
    samples: RingBuffer<CollectedSignal>,
    minimum_sample_interval_ms: u32,
    last_accepted: Option<Timestamp>,
}

impl SignalBuffer {
    fn new(capacity: usize, minimum_sample_interval_ms: u32) -> Self {
        Self {
            samples: RingBuffer::new(capacity),
            minimum_sample_interval_ms,
            last_accepted: None,
        }
    }
}

/// Per-frame buffer with its admission policy.
#[derive(Debug)]
struct FrameBuffer {
    frames: RingBuffer<CollectedCanRawFrame>,
    minimum_sample_interval_ms: u32,
    last_accepted: Option<Timestamp>,
}

impl FrameBuffer {
    fn new(capacity: usize, minimum_sample_interval_ms: u32) -> Self {
        Self {
            frames: RingBuffer::new(capacity),
            minimum_sample_interval_ms,
            last_accepted: None,
        }
    }
}

/// Non-monotone and under-interval arrivals are refused; interval zero
/// accepts every monotone sample.
fn admit(last: Option<Timestamp>, ts: Timestamp, interval_ms: u32) -> bool {
    match last {
        None => true,
        Some(last) => ts >= last && ts - last >= i64::from(interval_ms),
    }
}

/// The engine's view of recent bus activity.
pub struct SampleStore {
    signals: HashMap<SignalId, SignalBuffer>,
    can_frames: HashMap<(CanFrameId, ChannelId), FrameBuffer>,
    active_dtcs: Option<DtcSnapshot>,
    stats: Arc<InspectionStats>,
}

impl SampleStore {
    /// Creates an empty store. No signal is buffered until a matrix is
    /// adopted and [`SampleStore::reshape`] configures the buffers.
    pub fn new(stats: Arc<InspectionStats>) -> Self {
        Self {
            signals: HashMap::new(),
            can_frames: HashMap::new(),
            active_dtcs: None,
            stats,
        }
    }

    /// Reshapes the buffers for a newly adopted matrix.
    ///
    /// Per signal, the capacity is the maximum `sample_buffer_size` over all
    /// referencing conditions and the admission interval the minimum, so
    /// every condition sees at least what it asked for. Buffers for signals
    /// that remain configured keep their samples; buffers for removed
    /// signals are released.
    pub fn reshape(&mut self, matrix: &InspectionMatrix) {
        let mut signal_shape: HashMap<SignalId, (usize, u32)> = HashMap::new();
        let mut frame_shape: HashMap<(CanFrameId, ChannelId), (usize, u32)> = HashMap::new();

        for condition in &matrix.conditions {
            for info in &condition.signals {
                let entry = signal_shape
                    .entry(info.signal_id)
                    .or_insert((0, u32::MAX));
                entry.0 = entry.0.max(info.sample_buffer_size as usize);
                entry.1 = entry.1.min(info.minimum_sample_interval_ms);
            }
            for info in &condition.can_frames {
                let entry = frame_shape
                    .entry((info.frame_id, info.channel_id))
                    .or_insert((0, u32::MAX));
                entry.0 = entry.0.max(info.sample_buffer_size as usize);
                entry.1 = entry.1.min(info.minimum_sample_interval_ms);
            }
        }

        self.signals.retain(|id, _| signal_shape.contains_key(id));
        for (id, (capacity, interval)) in signal_shape {
            match self.signals.get_mut(&id) {
                Some(buffer) => {
                    buffer.samples.set_capacity(capacity);
                    buffer.minimum_sample_interval_ms = interval;
                }
                None => {
                    self.signals.insert(id, SignalBuffer::new(capacity, interval));
                }
            }
        }

        self.can_frames.retain(|key, _| frame_shape.contains_key(key));
        for (key, (capacity, interval)) in frame_shape {
            match self.can_frames.get_mut(&key) {
                Some(buffer) => {
                    buffer.frames.set_capacity(capacity);
                    buffer.minimum_sample_interval_ms = interval;
                }
                None => {
                    self.can_frames
                        .insert(key, FrameBuffer::new(capacity, interval));
                }
            }
        }

        debug!(
            signals = self.signals.len(),
            can_frames = self.can_frames.len(),
            "sample store reshaped"
        );
    }

    /// Routes one sample into its buffer. Returns `false` when the sample was
    /// rejected (unknown signal, non-monotone timestamp, or under the
    /// configured minimum interval).
    pub fn ingest_signal(&mut self, sample: CollectedSignal) -> bool {
        let Some(buffer) = self.signals.get_mut(&sample.signal_id) else {
            trace!(signal_id = sample.signal_id, "sample for unconfigured signal dropped");
            self.stats.samples_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        if !admit(
            buffer.last_accepted,
            sample.receive_time,
            buffer.minimum_sample_interval_ms,
        ) {
            self.stats.samples_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        buffer.last_accepted = Some(sample.receive_time);
        buffer.samples.push(sample);
        self.stats.samples_ingested.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Routes one raw CAN frame into its buffer, same policy as signals.
    pub fn ingest_frame(&mut self, frame: CollectedCanRawFrame) -> bool {
        let key = (frame.frame_id, frame.channel_id);
        let Some(buffer) = self.can_frames.get_mut(&key) else {
            trace!(frame_id = frame.frame_id, "unconfigured raw frame dropped");
            self.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        if !admit(
            buffer.last_accepted,
            frame.receive_time,
            buffer.minimum_sample_interval_ms,
        ) {
            self.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        buffer.last_accepted = Some(frame.receive_time);
        buffer.frames.push(frame);
        self.stats.frames_ingested.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Overwrites the active-DTC slot; most recent snapshot wins.
    pub fn set_dtcs(&mut self, snapshot: DtcSnapshot) {
        self.active_dtcs = Some(snapshot);
    }

    /// Current active-DTC snapshot, if the OBD collector delivered one.
    pub fn active_dtcs(&self) -> Option<&DtcSnapshot> {
        self.active_dtcs.as_ref()
    }

    /// Most recent value of a signal; `None` when the buffer is empty or the
    /// signal is not configured.
    pub fn last_value(&self, signal_id: SignalId) -> Option<SignalValue> {
        self.signals
            .get(&signal_id)?
            .samples
            .newest()
            .map(|sample| sample.value)
    }

    /// Windowed aggregate over a signal's samples.
    ///
    /// `LastWindow*` aggregates over `(now − period, now]`, `PrevLastWindow*`
    /// over `(now − 2·period, now − period]`. Returns `None` when the window
    /// holds no samples.
    pub fn window_stat(
        &self,
        signal_id: SignalId,
        function: WindowFunction,
        period_ms: u32,
        now: Timestamp,
    ) -> Option<f64> {
        let buffer = self.signals.get(&signal_id)?;
        let period = i64::from(period_ms);
        let (start, end) = match function {
            WindowFunction::LastWindowMin
            | WindowFunction::LastWindowMax
            | WindowFunction::LastWindowAvg => (now - period, now),
            WindowFunction::PrevLastWindowMin
            | WindowFunction::PrevLastWindowMax
            | WindowFunction::PrevLastWindowAvg => (now - 2 * period, now - period),
        };

        let mut count = 0u64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for sample in buffer.samples.iter() {
            if sample.receive_time > start && sample.receive_time <= end {
                let value = sample.value.as_f64();
                min = min.min(value);
                max = max.max(value);
                sum += value;
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }
        Some(match function {
            WindowFunction::LastWindowMin | WindowFunction::PrevLastWindowMin => min,
            WindowFunction::LastWindowMax | WindowFunction::PrevLastWindowMax => max,
            WindowFunction::LastWindowAvg | WindowFunction::PrevLastWindowAvg => {
                sum / count as f64
            }
        })
    }

    /// Copies out everything a fired condition collects.
    ///
    /// Per signal: up to `sample_buffer_size` most-recent samples with
    /// `receive_time <= now`, timestamp ascending; condition-only signals are
    /// excluded. Raw frames follow the same rule. The DTC snapshot is
    /// attached when the condition requests it.
    pub fn snapshot_for(
        &self,
        condition: &ConditionDef,
        now: Timestamp,
    ) -> (
        Vec<CollectedSignal>,
        Vec<CollectedCanRawFrame>,
        Option<DtcSnapshot>,
    ) {
        let mut signals = Vec::new();
        for info in &condition.signals {
            if info.condition_only {
                continue;
            }
            let Some(buffer) = self.signals.get(&info.signal_id) else {
                continue;
            };
            let mut collected: Vec<CollectedSignal> = buffer
                .samples
                .iter()
                .filter(|sample| sample.receive_time <= now)
                .copied()
                .collect();
            let keep = info.sample_buffer_size as usize;
            if collected.len() > keep {
                collected.drain(..collected.len() - keep);
            }
            signals.extend(collected);
        }

        let mut can_frames = Vec::new();
        for info in &condition.can_frames {
            let Some(buffer) = self.can_frames.get(&(info.frame_id, info.channel_id)) else {
                continue;
            };
            let mut collected: Vec<CollectedCanRawFrame> = buffer
                .frames
                .iter()
                .filter(|frame| frame.receive_time <= now)
                .copied()
                .collect();
            let keep = info.sample_buffer_size as usize;
            if collected.len() > keep {
                collected.drain(..collected.len() - keep);
            }
            can_frames.extend(collected);
        }

        let dtcs = if condition.include_active_dtcs {
            self.active_dtcs.clone()
        } else {
            None
        };

        (signals, can_frames, dtcs)
    }
}
