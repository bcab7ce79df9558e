//! Value nodes.
//!
//! A value node is a named vertex holding a tensor. Differentiable nodes also
//! carry a gradient accumulator; constants never receive gradients.

use factorgraph_core::{shape_of, GraphError, Result, Tensor};
use std::sync::Arc;

/// Storage slot of a value node.
#[derive(Debug, Clone, Default)]
enum Slot {
    #[default]
    Empty,
    /// Written by a producing operation or set by the caller.
    Owned(Tensor),
    /// Shared with a caller-supplied feed until the next forward pass.
    Bound(Arc<Tensor>),
}

/// Whether a value node participates in gradient computation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    /// Never receives gradients.
    Constant,
    /// Accumulates gradients during backward.
    Differentiable {
        /// Gradient accumulated by the latest backward pass
        grad: Option<Tensor>,
    },
}

/// A named value vertex.
#[derive(Debug, Clone)]
pub struct ValueNode {
    name: String,
    kind: ValueKind,
    slot: Slot,
}

impl ValueNode {
    /// Creates a differentiable value node without a value.
    pub fn differentiable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ValueKind::Differentiable { grad: None },
            slot: Slot::Empty,
        }
    }

    /// Creates a constant value node without a value.
    pub fn constant(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ValueKind::Constant,
            slot: Slot::Empty,
        }
    }

    /// Sets the initial value of the node.
    pub fn with_value(mut self, value: Tensor) -> Self {
        self.slot = Slot::Owned(value);
        self
    }

    /// Name of the node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Differentiability of the node.
    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    /// Checks if this node is a constant.
    pub fn is_const(&self) -> bool {
        matches!(self.kind, ValueKind::Constant)
    }

    /// Current value, whether owned or bound to a feed.
    pub fn value(&self) -> Option<&Tensor> {
        match &self.slot {
            Slot::Empty => None,
            Slot::Owned(value) => Some(value),
            Slot::Bound(shared) => Some(shared.as_ref()),
        }
    }

    /// Checks if the value is currently shared with a feed.
    pub fn is_bound(&self) -> bool {
        matches!(self.slot, Slot::Bound(_))
    }

    /// Stores an owned value, dropping any feed binding.
    pub fn set_value(&mut self, value: Tensor) {
        self.slot = Slot::Owned(value);
    }

    /// Shares `value` with the caller for the current pass.
    pub(crate) fn bind(&mut self, value: Arc<Tensor>) {
        self.slot = Slot::Bound(value);
    }

    /// Drops a feed binding left over from a previous pass.
    pub(crate) fn release_binding(&mut self) {
        if self.is_bound() {
            self.slot = Slot::Empty;
        }
    }

    /// Gradient accumulated by the latest backward pass.
    pub fn grad(&self) -> Option<&Tensor> {
        match &self.kind {
            ValueKind::Constant => None,
            ValueKind::Differentiable { grad } => grad.as_ref(),
        }
    }

    /// Resets the accumulator to zeros shaped like the current value.
    ///
    /// A node without a value ends up with no accumulator. Constants are
    /// left untouched.
    pub fn zero_grad(&mut self) {
        let zeros = self
            .value()
            .map(|value| Tensor::zeros(value.nrows(), value.ncols()));
        if let ValueKind::Differentiable { grad } = &mut self.kind {
            *grad = zeros;
        }
    }

    /// Seeds the accumulator with ones shaped like the current value.
    pub fn ones_grad(&mut self) -> Result<()> {
        let (rows, cols) = match self.value() {
            Some(value) => shape_of(value),
            None => return Err(GraphError::not_ready(&self.name)),
        };
        match &mut self.kind {
            ValueKind::Constant => Err(GraphError::ConstantSeed {
                name: self.name.clone(),
            }),
            ValueKind::Differentiable { grad } => {
                *grad = Some(Tensor::from_element(rows, cols, 1.0));
                Ok(())
            }
        }
    }

    /// Adds a gradient contribution. Constants discard it.
    pub(crate) fn accumulate_grad(&mut self, contribution: &Tensor) -> Result<()> {
        let ValueKind::Differentiable { grad } = &mut self.kind else {
            return Ok(());
        };
        match grad {
            None => *grad = Some(contribution.clone()),
            Some(acc) => {
                if shape_of(acc) != shape_of(contribution) {
                    return Err(GraphError::GradientShapeMismatch {
                        name: self.name.clone(),
                        expected: shape_of(acc),
                        actual: shape_of(contribution),
                    });
                }
                *acc += contribution;
            }
        }
        Ok(())
    }
}
