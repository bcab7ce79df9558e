//! Graph registry.
//!
//! Owns every value and operation node in two arenas indexed by dense
//! handles, plus the producer/consumer adjacency between them. The graph is
//! built once and then queried; registration never invalidates existing
//! handles.

use crate::backward;
use crate::operation::OperationNode;
use crate::scheduler::{self, FeedDict, ForwardPass};
use crate::value::ValueNode;
use factorgraph_core::{ExecutionConfig, GraphError, NodeKind, OpId, Result, Tensor, ValueId};
use log::trace;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet, VecDeque};

/// A value node together with its edges.
#[derive(Debug)]
struct ValueEntry {
    node: ValueNode,
    producers: Vec<OpId>,
    consumers: Vec<OpId>,
    pre_ready: bool,
}

/// An operation node together with its resolved edges.
#[derive(Debug)]
struct OpEntry {
    node: OperationNode,
    operands: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

/// The computation graph structure.
#[derive(Debug, Default)]
pub struct Graph {
    values: Vec<ValueEntry>,
    ops: Vec<OpEntry>,
    value_index: HashMap<String, ValueId>,
    op_index: HashMap<String, OpId>,
}

impl Graph {
    /// Creates a new empty computation graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a value node.
    ///
    /// When `needs_feed` is false the node is pre-ready: every forward pass
    /// treats its current value as valid without it being fed.
    pub fn register_value(&mut self, node: ValueNode, needs_feed: bool) -> Result<ValueId> {
        if self.value_index.contains_key(node.name()) {
            return Err(GraphError::duplicate(NodeKind::Value, node.name()));
        }
        let id = ValueId::new(self.values.len());
        trace!("Registering value {} as {id} (needs feed: {needs_feed})", node.name());
        self.value_index.insert(node.name().to_owned(), id);
        self.values.push(ValueEntry {
            node,
            producers: Vec::new(),
            consumers: Vec::new(),
            pre_ready: !needs_feed,
        });
        Ok(id)
    }

    /// Registers an operation node and its edges.
    ///
    /// Fails if the name is taken, if any declared operand or output is not
    /// a registered value node, if an output is listed twice, if there are
    /// no outputs, or if the new edges would close a cycle.
    pub fn register_operation(&mut self, node: OperationNode) -> Result<OpId> {
        if self.op_index.contains_key(node.name()) {
            return Err(GraphError::duplicate(NodeKind::Operation, node.name()));
        }
        if node.output_names().is_empty() {
            return Err(GraphError::invalid_operation(node.name(), "no outputs declared"));
        }

        let operands = node
            .operand_names()
            .iter()
            .map(|name| self.lookup(name))
            .collect::<Result<Vec<_>>>()?;
        let outputs = node
            .output_names()
            .iter()
            .map(|name| self.lookup(name))
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for &out in &outputs {
            if !seen.insert(out) {
                return Err(GraphError::invalid_operation(
                    node.name(),
                    format!("output {} listed twice", self.values[out.index()].node.name()),
                ));
            }
        }
        if let Some(cycle) = self.first_reachable(&outputs, &operands) {
            return Err(GraphError::invalid_operation(
                node.name(),
                format!(
                    "operand {} is reachable from its outputs",
                    self.values[cycle.index()].node.name()
                ),
            ));
        }

        let id = OpId::new(self.ops.len());
        trace!(
            "Registering operation {} as {id}: {} operand(s), {} output(s)",
            node.name(),
            operands.len(),
            outputs.len()
        );
        for &v in &operands {
            self.values[v.index()].consumers.push(id);
        }
        for &v in &outputs {
            self.values[v.index()].producers.push(id);
        }
        self.op_index.insert(node.name().to_owned(), id);
        self.ops.push(OpEntry {
            node,
            operands,
            outputs,
        });
        Ok(id)
    }

    /// Returns the first of `targets` reachable downstream of `from`.
    fn first_reachable(&self, from: &[ValueId], targets: &[ValueId]) -> Option<ValueId> {
        let targets: HashSet<ValueId> = targets.iter().copied().collect();
        let mut visited = vec![false; self.values.len()];
        let mut queue: VecDeque<ValueId> = VecDeque::new();
        for &v in from {
            if !visited[v.index()] {
                visited[v.index()] = true;
                queue.push_back(v);
            }
        }
        while let Some(v) = queue.pop_front() {
            if targets.contains(&v) {
                return Some(v);
            }
            for &op in &self.values[v.index()].consumers {
                for &out in &self.ops[op.index()].outputs {
                    if !visited[out.index()] {
                        visited[out.index()] = true;
                        queue.push_back(out);
                    }
                }
            }
        }
        None
    }

    /// Looks up a value node by name.
    pub fn lookup(&self, name: &str) -> Result<ValueId> {
        self.value_index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::unregistered(NodeKind::Value, name))
    }

    /// Looks up an operation node by name.
    pub fn lookup_op(&self, name: &str) -> Result<OpId> {
        self.op_index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::unregistered(NodeKind::Operation, name))
    }

    /// Fails unless `id` was issued by this graph.
    pub fn check_value(&self, id: ValueId) -> Result<()> {
        if id.index() < self.values.len() {
            Ok(())
        } else {
            Err(GraphError::unregistered(NodeKind::Value, id.to_string()))
        }
    }

    /// Gets a value node by its handle.
    pub fn value(&self, id: ValueId) -> Option<&ValueNode> {
        self.values.get(id.index()).map(|entry| &entry.node)
    }

    /// Gets a mutable value node by its handle.
    pub fn value_mut(&mut self, id: ValueId) -> Option<&mut ValueNode> {
        self.values.get_mut(id.index()).map(|entry| &mut entry.node)
    }

    /// Gets an operation node by its handle.
    pub fn operation(&self, id: OpId) -> Option<&OperationNode> {
        self.ops.get(id.index()).map(|entry| &entry.node)
    }

    /// Gets the current value of a node.
    pub fn get_value(&self, id: ValueId) -> Option<&Tensor> {
        self.value(id).and_then(ValueNode::value)
    }

    /// Sets the value of a node.
    pub fn set_value(&mut self, id: ValueId, value: Tensor) -> Result<()> {
        self.check_value(id)?;
        self.values[id.index()].node.set_value(value);
        Ok(())
    }

    /// Gets the gradient accumulated at a node by the latest backward pass.
    pub fn grad(&self, id: ValueId) -> Option<&Tensor> {
        self.value(id).and_then(ValueNode::grad)
    }

    /// Operations writing to a value node.
    pub fn producers(&self, id: ValueId) -> &[OpId] {
        self.values
            .get(id.index())
            .map(|entry| entry.producers.as_slice())
            .unwrap_or_default()
    }

    /// Operations reading a value node.
    pub fn consumers(&self, id: ValueId) -> &[OpId] {
        self.values
            .get(id.index())
            .map(|entry| entry.consumers.as_slice())
            .unwrap_or_default()
    }

    /// Operands of an operation, in declaration order.
    pub fn operands(&self, id: OpId) -> &[ValueId] {
        self.ops
            .get(id.index())
            .map(|entry| entry.operands.as_slice())
            .unwrap_or_default()
    }

    /// Outputs of an operation, in declaration order.
    pub fn outputs(&self, id: OpId) -> &[ValueId] {
        self.ops
            .get(id.index())
            .map(|entry| entry.outputs.as_slice())
            .unwrap_or_default()
    }

    /// Checks if a value node is valid at the start of every pass.
    pub fn is_pre_ready(&self, id: ValueId) -> bool {
        self.values.get(id.index()).is_some_and(|entry| entry.pre_ready)
    }

    /// Returns the number of value nodes.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Returns the number of operation nodes.
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Name of a value node, or its handle when the handle is foreign.
    pub(crate) fn value_name(&self, id: ValueId) -> String {
        self.value(id)
            .map_or_else(|| id.to_string(), |node| node.name().to_owned())
    }

    /// Name of an operation node, or its handle when the handle is foreign.
    pub(crate) fn op_name(&self, id: OpId) -> String {
        self.operation(id)
            .map_or_else(|| id.to_string(), |node| node.name().to_owned())
    }

    /// Drops feed bindings from a previous pass.
    pub(crate) fn release_bindings(&mut self) {
        for entry in &mut self.values {
            entry.node.release_binding();
        }
    }

    /// Shares a fed tensor with a value node for the current pass.
    pub(crate) fn bind(&mut self, id: ValueId, value: std::sync::Arc<Tensor>) {
        self.values[id.index()].node.bind(value);
    }

    /// Resets every differentiable accumulator.
    pub(crate) fn zero_grads(&mut self) {
        for entry in &mut self.values {
            entry.node.zero_grad();
        }
    }

    /// Seeds a node's accumulator with ones.
    pub(crate) fn seed_grad(&mut self, id: ValueId) -> Result<()> {
        self.values[id.index()].node.ones_grad()
    }

    /// Collects the current values of `ids`, failing on the first empty one.
    fn values_of(&self, ids: &[ValueId]) -> Result<Vec<&Tensor>> {
        ids.iter()
            .map(|&v| {
                let node = &self.values[v.index()].node;
                node.value().ok_or_else(|| GraphError::not_ready(node.name()))
            })
            .collect()
    }

    /// Runs an operation's forward contract and stores its outputs.
    pub(crate) fn evaluate(&mut self, id: OpId) -> Result<()> {
        let entry = &self.ops[id.index()];
        let results = {
            let operands = self.values_of(&entry.operands)?;
            entry.node.op().forward(&operands)?
        };
        if results.len() != entry.outputs.len() {
            return Err(GraphError::operation_failed(
                entry.node.name(),
                format!(
                    "produced {} output(s) for {} declared",
                    results.len(),
                    entry.outputs.len()
                ),
            ));
        }
        for (&out, value) in entry.outputs.iter().zip(results) {
            self.values[out.index()].node.set_value(value);
        }
        Ok(())
    }

    /// Runs an operation's backward contract and accumulates into operands.
    pub(crate) fn differentiate(&mut self, id: OpId) -> Result<()> {
        let entry = &self.ops[id.index()];
        let contributions = {
            let operands = self.values_of(&entry.operands)?;
            let outputs = self.values_of(&entry.outputs)?;
            let output_grads: Vec<Cow<'_, Tensor>> = entry
                .outputs
                .iter()
                .zip(&outputs)
                .map(|(&out, value)| {
                    self.values[out.index()].node.grad().map_or_else(
                        || Cow::Owned(Tensor::zeros(value.nrows(), value.ncols())),
                        Cow::Borrowed,
                    )
                })
                .collect();
            let output_grads: Vec<&Tensor> = output_grads.iter().map(AsRef::as_ref).collect();
            entry
                .node
                .op()
                .backward(&operands, &outputs, &output_grads)?
        };
        if contributions.len() != entry.operands.len() {
            return Err(GraphError::operation_failed(
                entry.node.name(),
                format!(
                    "returned {} gradient(s) for {} operand(s)",
                    contributions.len(),
                    entry.operands.len()
                ),
            ));
        }
        for (&operand, grad) in entry.operands.iter().zip(&contributions) {
            self.values[operand.index()].node.accumulate_grad(grad)?;
        }
        Ok(())
    }

    /// Runs a single-threaded forward pass.
    ///
    /// Computes only what `targets` depend on. `threads` must be 1.
    ///
    /// A fed node is ready from the start of the pass even when it has a
    /// producer. If that producer is required it still runs and replaces the
    /// fed value. Consumers released before it see the fed value and those
    /// released after it see the produced one; release order follows value
    /// handle order, so it depends on registration order.
    pub fn forward(
        &mut self,
        targets: &[ValueId],
        feeds: FeedDict,
        threads: usize,
    ) -> Result<ForwardPass> {
        self.forward_with(targets, feeds, &ExecutionConfig::with_threads(threads))
    }

    /// Runs a forward pass with a full execution configuration.
    pub fn forward_with(
        &mut self,
        targets: &[ValueId],
        feeds: FeedDict,
        config: &ExecutionConfig,
    ) -> Result<ForwardPass> {
        scheduler::forward(self, targets, feeds, config)
    }

    /// Propagates gradients from `seeds` through the subgraph of `pass`.
    ///
    /// `threads` must be 1.
    pub fn backward(
        &mut self,
        pass: &ForwardPass,
        seeds: &[ValueId],
        threads: usize,
    ) -> Result<()> {
        self.backward_with(pass, seeds, &ExecutionConfig::with_threads(threads))
    }

    /// Runs a backward pass with a full execution configuration.
    pub fn backward_with(
        &mut self,
        pass: &ForwardPass,
        seeds: &[ValueId],
        config: &ExecutionConfig,
    ) -> Result<()> {
        backward::backward(self, pass, seeds, config)
    }
}
