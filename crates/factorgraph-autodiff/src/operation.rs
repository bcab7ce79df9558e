//! Operation nodes and the evaluation contract they implement.
//!
//! The scheduler treats the numeric work of an operation as opaque: it
//! hands over operand values, stores whatever outputs come back, and adds
//! returned gradient contributions into the operands' accumulators.

use factorgraph_core::{Result, Tensor};
use std::fmt::Debug;

/// Trait for computations in the graph.
pub trait Operation: Debug {
    /// Performs the forward computation.
    ///
    /// Must return exactly one tensor per declared output, in order.
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>>;

    /// Computes gradient contributions for each operand.
    ///
    /// # Arguments
    /// * `operands` - The operand values used in the forward pass
    /// * `outputs` - The output values produced by the forward pass
    /// * `output_grads` - Accumulated gradient of each output
    ///
    /// # Returns
    /// One contribution per operand, in operand order
    fn backward(
        &self,
        operands: &[&Tensor],
        outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>>;

    /// Returns the name of this operation.
    fn name(&self) -> &str;
}

/// Whether gradients flow through an operation during backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum PropagationPolicy {
    /// Run the backward contract when an operand can receive gradients.
    #[default]
    Always,
    /// Never run the backward contract; traversal still passes through.
    Never,
}

impl PropagationPolicy {
    /// Checks if this policy lets gradients reach the operands.
    pub fn propagates(self) -> bool {
        matches!(self, Self::Always)
    }
}

/// A named operation vertex together with its declared edges.
#[derive(Debug)]
pub struct OperationNode {
    name: String,
    op: Box<dyn Operation>,
    operands: Vec<String>,
    outputs: Vec<String>,
    policy: PropagationPolicy,
}

impl OperationNode {
    /// Creates an operation node reading `operands` and writing `outputs`.
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        op: Box<dyn Operation>,
        operands: &[S],
        outputs: &[S],
    ) -> Self {
        Self {
            name: name.into(),
            op,
            operands: operands.iter().map(|s| s.as_ref().to_owned()).collect(),
            outputs: outputs.iter().map(|s| s.as_ref().to_owned()).collect(),
            policy: PropagationPolicy::default(),
        }
    }

    /// Sets the gradient propagation policy.
    pub fn with_policy(mut self, policy: PropagationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Name of the node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped computation.
    pub fn op(&self) -> &dyn Operation {
        self.op.as_ref()
    }

    /// Declared operand names, in order.
    pub fn operand_names(&self) -> &[String] {
        &self.operands
    }

    /// Declared output names, in order.
    pub fn output_names(&self) -> &[String] {
        &self.outputs
    }

    /// Gradient propagation policy.
    pub fn policy(&self) -> PropagationPolicy {
        self.policy
    }
}
