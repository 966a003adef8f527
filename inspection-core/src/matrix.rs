//! Inspection matrix: the active set of collection conditions.
//!
//! A matrix bundles every condition the engine currently evaluates together
//! with a single arena of expression nodes. Conditions reference the arena by
//! index; the arena is laid out depth-first pre-order, so every child sits at
//! a strictly greater index than its parent. The arena is immutable for the
//! lifetime of the matrix.

use crate::types::{
    CanFrameId, ChannelId, PassThroughMetadata, SignalId, SignalType, MAX_DIFFERENT_SIGNAL_IDS,
    MAX_EQUATION_DEPTH,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Window aggregate selector for [`NodeKind::WindowFunction`] nodes.
///
/// `Last*` aggregates over the trailing window `(now − period, now]`;
/// `PrevLast*` over the window immediately before it,
/// `(now − 2·period, now − period]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFunction {
    LastWindowMin,
    LastWindowMax,
    LastWindowAvg,
    PrevLastWindowMin,
    PrevLastWindowMax,
    PrevLastWindowAvg,
}

/// Node kind of the flat expression tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Most recent sample of a signal
    Signal(SignalId),

    /// Numeric constant
    NumberLiteral(f64),

    /// Boolean constant
    BoolLiteral(bool),

    /// Windowed aggregate over a signal's recent samples
    WindowFunction {
        signal_id: SignalId,
        function: WindowFunction,
        period_ms: u32,
    },

    Add,
    Subtract,
    Multiply,
    Divide,

    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Equal,
    NotEqual,

    And,
    Or,
    Not,
}

/// One node of the expression arena.
///
/// `left`/`right` are indices into the owning matrix's `expression_nodes`.
/// Unary operators use `left` only; leaves use neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionNode {
    pub kind: NodeKind,
    pub left: Option<usize>,
    pub right: Option<usize>,
}

impl ExpressionNode {
    /// Leaf node reading the most recent sample of `signal_id`.
    pub fn signal(signal_id: SignalId) -> Self {
        Self {
            kind: NodeKind::Signal(signal_id),
            left: None,
            right: None,
        }
    }

    /// Numeric constant leaf.
    pub fn number(value: f64) -> Self {
        Self {
            kind: NodeKind::NumberLiteral(value),
            left: None,
            right: None,
        }
    }

    /// Boolean constant leaf.
    pub fn boolean(value: bool) -> Self {
        Self {
            kind: NodeKind::BoolLiteral(value),
            left: None,
            right: None,
        }
    }

    /// Window aggregate leaf.
    pub fn window(signal_id: SignalId, function: WindowFunction, period_ms: u32) -> Self {
        Self {
            kind: NodeKind::WindowFunction {
                signal_id,
                function,
                period_ms,
            },
            left: None,
            right: None,
        }
    }

    /// Unary operator over the node at `operand`.
    pub fn unary(kind: NodeKind, operand: usize) -> Self {
        Self {
            kind,
            left: Some(operand),
            right: None,
        }
    }

    /// Binary operator over the nodes at `left` and `right`.
    pub fn binary(kind: NodeKind, left: usize, right: usize) -> Self {
        Self {
            kind,
            left: Some(left),
            right: Some(right),
        }
    }
}

/// Collection parameters for one signal referenced by a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalCollectionInfo {
    /// Decoded signal identifier
    pub signal_id: SignalId,

    /// At least this many most-recent samples are kept buffered
    pub sample_buffer_size: u32,

    /// Zero accepts every sample as seen on the bus
    pub minimum_sample_interval_ms: u32,

    /// Zero disables fixed-window sampling for this signal
    pub fixed_window_period_ms: u32,

    /// Buffered for condition evaluation only; excluded from snapshots
    pub condition_only: bool,

    /// Declared value type from the decoder manifest
    pub signal_type: SignalType,
}

/// Collection parameters for one raw CAN frame referenced by a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrameCollectionInfo {
    /// Raw frame identifier
    pub frame_id: CanFrameId,

    /// Channel the frame is collected from
    pub channel_id: ChannelId,

    /// At least this many most-recent frames are kept buffered
    pub sample_buffer_size: u32,

    /// Zero accepts every frame as seen on the bus
    pub minimum_sample_interval_ms: u32,
}

/// One collection condition: a boolean expression plus what to collect when
/// it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDef {
    /// Root index into the matrix's expression arena
    pub root: usize,

    /// Minimum milliseconds between two triggers of this condition
    pub minimum_publish_interval_ms: u32,

    /// Milliseconds to keep collecting after the condition turns true
    /// before the trigger fires; zero fires immediately
    pub after_duration_ms: u32,

    /// Signals buffered for this condition
    pub signals: Vec<SignalCollectionInfo>,

    /// Raw CAN frames buffered for this condition
    pub can_frames: Vec<CanFrameCollectionInfo>,

    /// Attach the active-DTC snapshot to the trigger
    pub include_active_dtcs: bool,

    /// Fire only on a false-to-true transition of the expression
    pub trigger_only_on_rising_edge: bool,

    /// Publication metadata passed through to the upload path
    pub metadata: PassThroughMetadata,
}

/// The active set of conditions plus their shared expression arena.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionMatrix {
    pub conditions: Vec<ConditionDef>,
    pub expression_nodes: Vec<ExpressionNode>,
}

/// Reasons a staged matrix is refused.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("condition {condition}: expression tree exceeds maximum depth {max}")]
    TooDeep { condition: usize, max: u32 },

    #[error("condition {condition}: root index {root} out of range ({nodes} nodes)")]
    RootOutOfRange {
        condition: usize,
        root: usize,
        nodes: usize,
    },

    #[error(
        "condition {condition}: node {parent} references child {child} \
         outside the pre-order layout"
    )]
    BadChildIndex {
        condition: usize,
        parent: usize,
        child: usize,
    },

    #[error("condition {condition}: signal {signal_id} is not configured for collection")]
    UnresolvedSignal {
        condition: usize,
        signal_id: SignalId,
    },

    #[error("condition {condition}: signal {signal_id} has a zero sample buffer")]
    ZeroSignalBuffer {
        condition: usize,
        signal_id: SignalId,
    },

    #[error("condition {condition}: can frame {frame_id:#x} has a zero sample buffer")]
    ZeroFrameBuffer {
        condition: usize,
        frame_id: CanFrameId,
    },

    #[error("matrix references {count} distinct signals, limit is {limit}")]
    TooManySignals { count: usize, limit: usize },
}

impl InspectionMatrix {
    /// Number of distinct signal ids referenced across all conditions.
    pub fn distinct_signal_count(&self) -> usize {
        let mut distinct = HashSet::new();
        for condition in &self.conditions {
            for info in &condition.signals {
                distinct.insert(info.signal_id);
            }
        }
        distinct.len()
    }

    /// Validates the matrix against the engine's structural limits.
    ///
    /// Checks tree depth, arena layout (children strictly after parents, all
    /// indices in range), buffer sizes, the distinct-signal limit, and that
    /// every signal an expression reads is configured for collection by the
    /// owning condition. A matrix that fails here must not be adopted.
    pub fn validate(&self) -> Result<(), MatrixError> {
        let count = self.distinct_signal_count();
        if count > MAX_DIFFERENT_SIGNAL_IDS {
            return Err(MatrixError::TooManySignals {
                count,
                limit: MAX_DIFFERENT_SIGNAL_IDS,
            });
        }

        for (index, condition) in self.conditions.iter().enumerate() {
            for info in &condition.signals {
                if info.sample_buffer_size == 0 {
                    return Err(MatrixError::ZeroSignalBuffer {
                        condition: index,
                        signal_id: info.signal_id,
                    });
                }
            }
            for info in &condition.can_frames {
                if info.sample_buffer_size == 0 {
                    return Err(MatrixError::ZeroFrameBuffer {
                        condition: index,
                        frame_id: info.frame_id,
                    });
                }
            }

            if condition.root >= self.expression_nodes.len() {
                return Err(MatrixError::RootOutOfRange {
                    condition: index,
                    root: condition.root,
                    nodes: self.expression_nodes.len(),
                });
            }

            let configured: HashSet<SignalId> = condition
                .signals
                .iter()
                .map(|info| info.signal_id)
                .collect();
            self.validate_node(index, condition.root, 1, &configured)?;
        }

        Ok(())
    }

    fn validate_node(
        &self,
        condition: usize,
        index: usize,
        depth: u32,
        configured: &HashSet<SignalId>,
    ) -> Result<(), MatrixError> {
        if depth > MAX_EQUATION_DEPTH {
            return Err(MatrixError::TooDeep {
                condition,
                max: MAX_EQUATION_DEPTH,
            });
        }

        let node = &self.expression_nodes[index];
        match node.kind {
            NodeKind::Signal(signal_id)
            | NodeKind::WindowFunction { signal_id, .. } => {
                if !configured.contains(&signal_id) {
                    return Err(MatrixError::UnresolvedSignal {
                        condition,
                        signal_id,
                    });
                }
            }
            _ => {}
        }

        for child in [node.left, node.right].into_iter().flatten() {
            if child <= index || child >= self.expression_nodes.len() {
                return Err(MatrixError::BadChildIndex {
                    condition,
                    parent: index,
                    child,
                });
            }
            self.validate_node(condition, child, depth + 1, configured)?;
        }

        Ok(())
    }
}
