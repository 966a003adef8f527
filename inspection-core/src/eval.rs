//! Expression evaluation over the sample store.
//!
//! Depth-first evaluation of the flat AST. Evaluation is purely functional:
//! it reads the store and `now` and carries no state of its own. Data
//! problems (missing samples, empty windows, division by zero) collapse into
//! [`EvalValue::Invalid`], which the trigger engine coerces to `false`; they
//! are never errors.

use crate::matrix::{ExpressionNode, NodeKind};
use crate::store::SampleStore;
use crate::types::{SignalValue, Timestamp};

/// Result of evaluating an expression node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvalValue {
    Number(f64),
    Bool(bool),
    /// Evaluation failed on data; propagates and forces the condition false.
    Invalid,
}

impl EvalValue {
    /// Truthiness at the condition's top level; `Invalid` is `false`.
    pub fn truthy(&self) -> bool {
        match self {
            EvalValue::Number(n) => *n != 0.0,
            EvalValue::Bool(b) => *b,
            EvalValue::Invalid => false,
        }
    }

    /// Numeric view: booleans widen to 1.0/0.0.
    fn as_number(&self) -> Option<f64> {
        match self {
            EvalValue::Number(n) => Some(*n),
            EvalValue::Bool(true) => Some(1.0),
            EvalValue::Bool(false) => Some(0.0),
            EvalValue::Invalid => None,
        }
    }

    /// Boolean view: numbers are true when non-zero.
    fn as_bool(&self) -> Option<bool> {
        match self {
            EvalValue::Number(n) => Some(*n != 0.0),
            EvalValue::Bool(b) => Some(*b),
            EvalValue::Invalid => None,
        }
    }
}

/// Evaluates the expression rooted at `root` against the store at `now`.
pub fn evaluate(
    nodes: &[ExpressionNode],
    root: usize,
    store: &SampleStore,
    now: Timestamp,
) -> EvalValue {
    eval_node(nodes, root, store, now)
}

fn eval_child(
    nodes: &[ExpressionNode],
    child: Option<usize>,
    store: &SampleStore,
    now: Timestamp,
) -> EvalValue {
    // A missing operand is a data defect, not a crash.
    match child {
        Some(index) => eval_node(nodes, index, store, now),
        None => EvalValue::Invalid,
    }
}

fn eval_node(
    nodes: &[ExpressionNode],
    index: usize,
    store: &SampleStore,
    now: Timestamp,
) -> EvalValue {
    let node = &nodes[index];
    match node.kind {
        NodeKind::Signal(signal_id) => match store.last_value(signal_id) {
            Some(SignalValue::Boolean(b)) => EvalValue::Bool(b),
            Some(value) => EvalValue::Number(value.as_f64()),
            None => EvalValue::Invalid,
        },

        NodeKind::NumberLiteral(value) => EvalValue::Number(value),
        NodeKind::BoolLiteral(value) => EvalValue::Bool(value),

        NodeKind::WindowFunction {
            signal_id,
            function,
            period_ms,
        } => match store.window_stat(signal_id, function, period_ms, now) {
            Some(value) => EvalValue::Number(value),
            None => EvalValue::Invalid,
        },

        NodeKind::Add | NodeKind::Subtract | NodeKind::Multiply | NodeKind::Divide => {
            let lhs = eval_child(nodes, node.left, store, now);
            let rhs = eval_child(nodes, node.right, store, now);
            let (Some(l), Some(r)) = (lhs.as_number(), rhs.as_number()) else {
                return EvalValue::Invalid;
            };
            match node.kind {
                NodeKind::Add => EvalValue::Number(l + r),
                NodeKind::Subtract => EvalValue::Number(l - r),
                NodeKind::Multiply => EvalValue::Number(l * r),
                NodeKind::Divide => {
                    if r == 0.0 {
                        EvalValue::Invalid
                    } else {
                        EvalValue::Number(l / r)
                    }
                }
                _ => unreachable!(),
            }
        }

        NodeKind::LessThan
        | NodeKind::LessEqual
        | NodeKind::GreaterThan
        | NodeKind::GreaterEqual
        | NodeKind::Equal
        | NodeKind::NotEqual => {
            let lhs = eval_child(nodes, node.left, store, now);
            let rhs = eval_child(nodes, node.right, store, now);
            let (Some(l), Some(r)) = (lhs.as_number(), rhs.as_number()) else {
                return EvalValue::Invalid;
            };
            let result = match node.kind {
                NodeKind::LessThan => l < r,
                NodeKind::LessEqual => l <= r,
                NodeKind::GreaterThan => l > r,
                NodeKind::GreaterEqual => l >= r,
                NodeKind::Equal => l == r,
                NodeKind::NotEqual => l != r,
                _ => unreachable!(),
            };
            EvalValue::Bool(result)
        }

        NodeKind::And => {
            let lhs = eval_child(nodes, node.left, store, now);
            // A definite false decides AND without the right operand.
            if lhs.as_bool() == Some(false) {
                return EvalValue::Bool(false);
            }
            let rhs = eval_child(nodes, node.right, store, now);
            match (lhs.as_bool(), rhs.as_bool()) {
                (_, Some(false)) => EvalValue::Bool(false),
                (Some(true), Some(true)) => EvalValue::Bool(true),
                _ => EvalValue::Invalid,
            }
        }

        NodeKind::Or => {
            let lhs = eval_child(nodes, node.left, store, now);
            if lhs.as_bool() == Some(true) {
                return EvalValue::Bool(true);
            }
            let rhs = eval_child(nodes, node.right, store, now);
            match (lhs.as_bool(), rhs.as_bool()) {
                (_, Some(true)) => EvalValue::Bool(true),
                (Some(false), Some(false)) => EvalValue::Bool(false),
                _ => EvalValue::Invalid,
            }
        }

        NodeKind::Not => match eval_child(nodes, node.left, store, now).as_bool() {
            Some(value) => EvalValue::Bool(!value),
            None => EvalValue::Invalid,
        },
    }
}
