//! Core data types shared across the collection and inspection pipeline.
//!
//! This module defines the identifiers, typed signal values, and collected-data
//! containers that flow from the bus adapters through the inspection engine and
//! out to the publish queue. All types are plain data: the engine owns no
//! handles into adapter or transport state.

use serde::{Deserialize, Serialize};

/// Decoded signal identifier, unique across the whole vehicle.
pub type SignalId = u32;

/// Raw CAN frame identifier (11-bit or 29-bit, widened).
pub type CanFrameId = u32;

/// Numeric identifier of the CAN channel a frame was observed on.
pub type ChannelId = u32;

/// Monotonically increasing identifier assigned to each trigger.
pub type EventId = u32;

/// Monotonic milliseconds since an arbitrary epoch chosen by the clock source.
pub type Timestamp = i64;

/// Conditions beyond this count are dropped when a matrix is staged.
pub const MAX_NUMBER_OF_ACTIVE_CONDITIONS: usize = 256;

/// Wildcard condition mask used by collaborators that address every condition.
pub const ALL_CONDITIONS: u32 = 0xFFFF_FFFF;

/// Expression trees deeper than this are rejected at matrix load.
pub const MAX_EQUATION_DEPTH: u32 = 10;

/// Upper bound on distinct signal ids referenced by one matrix.
pub const MAX_DIFFERENT_SIGNAL_IDS: usize = 50_000;

/// The trigger engine evaluates conditions at most once per this interval.
pub const EVALUATE_INTERVAL_MS: i64 = 1;

/// Classic CAN payload limit; CAN FD frames are truncated by the adapters.
pub const MAX_CAN_FRAME_BYTE_SIZE: usize = 8;

/// Type tag for a decoded signal, as declared by the decoder manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float,
    Double,
    Boolean,
    /// Handle into an externally managed raw-data buffer.
    RawHandle,
}

/// A decoded signal value paired with its type tag.
///
/// Arithmetic inside the inspection engine is performed in `f64`; widening a
/// `Uint64`/`Int64` value loses precision above 2^53, which is accepted for
/// condition evaluation purposes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalValue {
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Uint64(u64),
    Int64(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    RawHandle(u32),
}

impl SignalValue {
    /// Returns the type tag of this value.
    pub fn signal_type(&self) -> SignalType {
        match self {
            SignalValue::Uint8(_) => SignalType::Uint8,
            SignalValue::Int8(_) => SignalType::Int8,
            SignalValue::Uint16(_) => SignalType::Uint16,
            SignalValue::Int16(_) => SignalType::Int16,
            SignalValue::Uint32(_) => SignalType::Uint32,
            SignalValue::Int32(_) => SignalType::Int32,
            SignalValue::Uint64(_) => SignalType::Uint64,
            SignalValue::Int64(_) => SignalType::Int64,
            SignalValue::Float(_) => SignalType::Float,
            SignalValue::Double(_) => SignalType::Double,
            SignalValue::Boolean(_) => SignalType::Boolean,
            SignalValue::RawHandle(_) => SignalType::RawHandle,
        }
    }

    /// Widens the value to `f64` for evaluation.
    ///
    /// Booleans map to `1.0`/`0.0`; raw-data handles expose their numeric
    /// handle so conditions can test for presence.
    pub fn as_f64(&self) -> f64 {
        match *self {
            SignalValue::Uint8(v) => f64::from(v),
            SignalValue::Int8(v) => f64::from(v),
            SignalValue::Uint16(v) => f64::from(v),
            SignalValue::Int16(v) => f64::from(v),
            SignalValue::Uint32(v) => f64::from(v),
            SignalValue::Int32(v) => f64::from(v),
            SignalValue::Uint64(v) => v as f64,
            SignalValue::Int64(v) => v as f64,
            SignalValue::Float(v) => f64::from(v),
            SignalValue::Double(v) => v,
            SignalValue::Boolean(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
            SignalValue::RawHandle(v) => f64::from(v),
        }
    }
}

/// One decoded sample as produced by a bus adapter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollectedSignal {
    /// Decoded signal identifier
    pub signal_id: SignalId,

    /// Reception timestamp in monotonic milliseconds
    pub receive_time: Timestamp,

    /// Typed sample value
    pub value: SignalValue,
}

impl CollectedSignal {
    /// Creates a new sample.
    pub fn new(signal_id: SignalId, receive_time: Timestamp, value: SignalValue) -> Self {
        Self {
            signal_id,
            receive_time,
            value,
        }
    }
}

/// One raw CAN frame as observed on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedCanRawFrame {
    /// Raw frame identifier
    pub frame_id: CanFrameId,

    /// Channel the frame was received on
    pub channel_id: ChannelId,

    /// Reception timestamp in monotonic milliseconds
    pub receive_time: Timestamp,

    /// Frame payload, valid up to `size` bytes
    pub data: [u8; MAX_CAN_FRAME_BYTE_SIZE],

    /// Number of valid payload bytes
    pub size: u8,
}

impl CollectedCanRawFrame {
    /// Creates a raw frame record, truncating the payload to the classic CAN
    /// limit if the adapter handed over more bytes.
    pub fn new(
        frame_id: CanFrameId,
        channel_id: ChannelId,
        receive_time: Timestamp,
        payload: &[u8],
    ) -> Self {
        let size = payload.len().min(MAX_CAN_FRAME_BYTE_SIZE);
        let mut data = [0u8; MAX_CAN_FRAME_BYTE_SIZE];
        data[..size].copy_from_slice(&payload[..size]);
        Self {
            frame_id,
            channel_id,
            receive_time,
            data,
            size: size as u8,
        }
    }

    /// Returns the valid portion of the payload.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.size)]
    }
}

/// Snapshot of the diagnostic trouble codes active on the vehicle.
///
/// The codes themselves are opaque to the engine; the OBD collector produces
/// them and the serializer forwards them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DtcSnapshot {
    /// Active trouble codes, e.g. `P0420`
    pub codes: Vec<String>,

    /// Timestamp the snapshot was taken at
    pub observed_at: Timestamp,
}

impl DtcSnapshot {
    /// Creates a snapshot from a list of active codes.
    pub fn new(codes: Vec<String>, observed_at: Timestamp) -> Self {
        Self { codes, observed_at }
    }

    /// True when no trouble codes are active.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// One unit of work handed from a producer thread to the inspection worker.
///
/// A frame carries any combination of decoded signals, one raw CAN frame, and
/// a DTC snapshot; adapters batch whatever they decoded from a single bus
/// event into one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectedDataFrame {
    /// Decoded signal samples
    pub signals: Vec<CollectedSignal>,

    /// Raw CAN frame, when raw collection is active for its id
    pub raw_can_frame: Option<CollectedCanRawFrame>,

    /// Most recent active-DTC snapshot from the OBD collector
    pub active_dtcs: Option<DtcSnapshot>,
}

impl CollectedDataFrame {
    /// Creates a frame carrying only decoded signals.
    pub fn from_signals(signals: Vec<CollectedSignal>) -> Self {
        Self {
            signals,
            ..Default::default()
        }
    }

    /// Creates a frame carrying only a raw CAN frame.
    pub fn from_raw_frame(frame: CollectedCanRawFrame) -> Self {
        Self {
            raw_can_frame: Some(frame),
            ..Default::default()
        }
    }

    /// Creates a frame carrying only a DTC snapshot.
    pub fn from_dtcs(dtcs: DtcSnapshot) -> Self {
        Self {
            active_dtcs: Some(dtcs),
            ..Default::default()
        }
    }
}

/// Publication metadata passed through from the collection scheme unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassThroughMetadata {
    /// Compress the serialized payload before upload
    pub compress: bool,

    /// Spool the payload on publish failure instead of dropping it
    pub persist: bool,

    /// Upload priority; higher drains first from the spool
    pub priority: u32,

    /// Identifier of the decoder manifest the signals were decoded with
    pub decoder_id: String,

    /// Identifier of the collection scheme that owns the condition
    pub collection_scheme_id: String,
}

/// Output of the inspection engine: everything collected for one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredCollectionData {
    /// Publication metadata of the fired condition
    pub metadata: PassThroughMetadata,

    /// Timestamp the condition fired at
    pub trigger_time: Timestamp,

    /// Collected signal samples, timestamp ascending per signal
    pub signals: Vec<CollectedSignal>,

    /// Collected raw CAN frames, timestamp ascending per frame id
    pub can_frames: Vec<CollectedCanRawFrame>,

    /// Active DTCs, when the condition requested them
    pub active_dtcs: Option<DtcSnapshot>,

    /// Fresh monotonically increasing event identifier
    pub event_id: EventId,
}
