//! # Collection & Inspection Engine
//!
//! The on-vehicle core of the FleetWatch edge agent. Bus adapters feed
//! decoded signals, raw CAN frames, and DTC snapshots into a bounded ingress
//! queue; a dedicated worker thread maintains a sliding window of recent
//! samples, evaluates the active set of collection conditions against it
//! every millisecond, and pushes triggered snapshots onto a bounded publish
//! queue for the upload path.
//!
//! ## Architecture
//!
//! ```text
//! bus adapters ──► ingress queue ──► inspection worker ──► publish queue ──► serializer/upload
//!                                      │        │
//!                                 sample store  trigger engine
//!                                      ▲
//!                              matrix manager ◄── schema manager
//! ```
//!
//! ## Guarantees
//!
//! - Producers never block: both queues refuse new elements when full.
//! - The sample store and trigger state are owned by the worker thread;
//!   no other thread touches them.
//! - A tick evaluates against exactly one matrix version; staged matrices
//!   are adopted only at tick start.
//! - Data errors (bad samples, empty windows, division by zero, full
//!   queues) are counted, never fatal.

pub mod clock;
pub mod config;
pub mod engine;
pub mod eval;
pub mod manager;
pub mod matrix;
pub mod queue;
pub mod stats;
pub mod store;
pub mod types;
pub mod worker;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::InspectionConfig;
pub use engine::InspectionEngine;
pub use eval::{evaluate, EvalValue};
pub use manager::MatrixManager;
pub use matrix::{
    CanFrameCollectionInfo, ConditionDef, ExpressionNode, InspectionMatrix, MatrixError, NodeKind,
    SignalCollectionInfo, WindowFunction,
};
pub use queue::BoundedQueue;
pub use stats::{InspectionStats, InspectionStatsSnapshot};
pub use store::{RingBuffer, SampleStore};
pub use types::{
    CanFrameId, ChannelId, CollectedCanRawFrame, CollectedDataFrame, CollectedSignal, DtcSnapshot,
    EventId, PassThroughMetadata, SignalId, SignalType, SignalValue, Timestamp,
    TriggeredCollectionData, ALL_CONDITIONS, EVALUATE_INTERVAL_MS, MAX_CAN_FRAME_BYTE_SIZE,
    MAX_DIFFERENT_SIGNAL_IDS, MAX_EQUATION_DEPTH, MAX_NUMBER_OF_ACTIVE_CONDITIONS,
};
pub use worker::InspectionWorker;
