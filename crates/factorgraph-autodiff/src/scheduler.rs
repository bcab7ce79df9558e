//! Dependency analysis and forward execution.
//!
//! A forward query first marks every value node the targets depend on, then
//! drains a queue of operations whose operands are all ready. Operations are
//! released by reference counts seeded from the readiness snapshot at the
//! start of the pass, so fed and pre-ready nodes need no special casing.
//! Operations that cannot influence a target are dequeued but never run.

use crate::graph::Graph;
use factorgraph_core::{ExecutionConfig, ExecutionMode, GraphError, OpId, Result, Tensor, ValueId};
use log::{debug, log, Level};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Caller-supplied values for a single forward pass, keyed by node name.
///
/// Tensors are shared, not copied: the graph holds a reference to each fed
/// tensor until the next forward pass starts.
#[derive(Debug, Clone, Default)]
pub struct FeedDict {
    entries: HashMap<String, Arc<Tensor>>,
}

impl FeedDict {
    /// Creates an empty feed dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a feed, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Arc<Tensor>>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds or replaces a feed.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Arc<Tensor>>) {
        self.entries.insert(name.into(), value.into());
    }

    /// Gets the tensor fed to `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<Tensor>> {
        self.entries.get(name)
    }

    /// Returns the number of feeds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if no feeds are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, tensor)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Tensor>)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<S: Into<String>> FromIterator<(S, Tensor)> for FeedDict {
    fn from_iter<I: IntoIterator<Item = (S, Tensor)>>(iter: I) -> Self {
        let mut feeds = Self::new();
        for (name, value) in iter {
            feeds.insert(name, value);
        }
        feeds
    }
}

/// Bookkeeping of one forward query.
///
/// Returned by a forward pass and consumed by the backward pass that
/// follows it. It records the registry sizes it was built against so a
/// backward call on a mutated graph is detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPass {
    targets: Vec<ValueId>,
    required: Vec<bool>,
    ready: Vec<bool>,
    executed: Vec<OpId>,
    skipped: Vec<OpId>,
    op_count: usize,
}

impl ForwardPass {
    /// Requested targets, in request order.
    pub fn targets(&self) -> &[ValueId] {
        &self.targets
    }

    /// Checks if `id` can influence a target.
    pub fn is_required(&self, id: ValueId) -> bool {
        self.required.get(id.index()).copied().unwrap_or(false)
    }

    /// Checks if `id` held a valid value at the end of the pass.
    pub fn is_ready(&self, id: ValueId) -> bool {
        self.ready.get(id.index()).copied().unwrap_or(false)
    }

    /// Required flags, indexed by value handle.
    pub fn required(&self) -> &[bool] {
        &self.required
    }

    /// Ready flags, indexed by value handle.
    pub fn ready(&self) -> &[bool] {
        &self.ready
    }

    /// Operations evaluated, in execution order.
    pub fn executed(&self) -> &[OpId] {
        &self.executed
    }

    /// Operations released but pruned because no target needed them.
    pub fn skipped(&self) -> &[OpId] {
        &self.skipped
    }

    /// Checks if `op` was evaluated during this pass.
    pub fn was_executed(&self, op: OpId) -> bool {
        self.executed.contains(&op)
    }

    /// The requested target nodes, in request order.
    pub fn results<'g>(&self, graph: &'g Graph) -> Vec<&'g crate::value::ValueNode> {
        self.targets.iter().filter_map(|&id| graph.value(id)).collect()
    }

    /// Fails unless the pass was built against a graph of `graph`'s size.
    pub fn check_consistent(&self, graph: &Graph) -> Result<()> {
        if self.required.len() != graph.value_count() || self.ready.len() != graph.value_count() {
            return Err(GraphError::inconsistent_pass(format!(
                "pass covers {} value node(s), graph has {}",
                self.required.len(),
                graph.value_count()
            )));
        }
        if self.op_count != graph.op_count() {
            return Err(GraphError::inconsistent_pass(format!(
                "pass covers {} operation(s), graph has {}",
                self.op_count,
                graph.op_count()
            )));
        }
        Ok(())
    }
}

/// Marks every value node that can influence at least one of `targets`.
///
/// Walks producer edges backwards from the targets. Each node is marked and
/// enqueued at most once. Fails if a target is not a handle of `graph`.
pub fn compute_required(graph: &Graph, targets: &[ValueId]) -> Result<Vec<bool>> {
    let mut required = vec![false; graph.value_count()];
    let mut queue = VecDeque::new();

    for &target in targets {
        graph.check_value(target)?;
        if !required[target.index()] {
            required[target.index()] = true;
            queue.push_back(target);
        }
    }

    while let Some(current) = queue.pop_front() {
        for &op in graph.producers(current) {
            for &operand in graph.operands(op) {
                if !required[operand.index()] {
                    required[operand.index()] = true;
                    queue.push_back(operand);
                }
            }
        }
    }

    Ok(required)
}

/// Level for per-operation scheduling messages.
pub(crate) fn schedule_level(config: &ExecutionConfig) -> Level {
    if config.trace_schedule {
        Level::Debug
    } else {
        Level::Trace
    }
}

/// Decrements a pending counter, enqueueing the operation when it hits zero.
pub(crate) fn release(pending: &mut [usize], queue: &mut VecDeque<OpId>, op: OpId) {
    let count = &mut pending[op.index()];
    if *count == 0 {
        return;
    }
    *count -= 1;
    if *count == 0 {
        queue.push_back(op);
    }
}

/// Runs a forward query.
pub fn forward(
    graph: &mut Graph,
    targets: &[ValueId],
    feeds: FeedDict,
    config: &ExecutionConfig,
) -> Result<ForwardPass> {
    let mode = config.mode()?;

    let required = compute_required(graph, targets)?;
    let bound = feeds
        .entries
        .into_iter()
        .map(|(name, value)| Ok((graph.lookup(&name)?, value)))
        .collect::<Result<Vec<_>>>()?;

    graph.release_bindings();
    let mut ready: Vec<bool> = (0..graph.value_count())
        .map(|i| graph.is_pre_ready(ValueId::new(i)))
        .collect();
    for (id, value) in bound {
        ready[id.index()] = true;
        graph.bind(id, value);
    }

    let mut pass = ForwardPass {
        targets: targets.to_vec(),
        required,
        ready,
        executed: Vec::new(),
        skipped: Vec::new(),
        op_count: graph.op_count(),
    };

    match mode {
        ExecutionMode::Sequential => sequential_forward(graph, &mut pass, config)?,
        _ => {
            return Err(GraphError::UnsupportedMode {
                threads: config.threads,
            })
        }
    }

    for &target in targets {
        if !pass.ready[target.index()] {
            return Err(GraphError::not_ready(graph.value_name(target)));
        }
    }

    debug!(
        "Forward pass: {} required value(s), {} operation(s) executed, {} skipped",
        pass.required.iter().filter(|&&r| r).count(),
        pass.executed.len(),
        pass.skipped.len()
    );
    Ok(pass)
}

/// Drains the ready queue on the calling thread.
fn sequential_forward(
    graph: &mut Graph,
    pass: &mut ForwardPass,
    config: &ExecutionConfig,
) -> Result<()> {
    let level = schedule_level(config);
    let mut pending: Vec<usize> = (0..graph.op_count())
        .map(|i| graph.operands(OpId::new(i)).len())
        .collect();
    let mut queue = VecDeque::new();

    for (index, _) in pass.ready.iter().enumerate().filter(|(_, &ready)| ready) {
        for &op in graph.consumers(ValueId::new(index)) {
            release(&mut pending, &mut queue, op);
        }
    }

    while let Some(op) = queue.pop_front() {
        let necessary = graph
            .outputs(op)
            .iter()
            .any(|out| pass.required[out.index()]);
        if !necessary {
            log!(level, "Skipping {} ({op}): no required output", graph.op_name(op));
            pass.skipped.push(op);
            continue;
        }

        log!(level, "Evaluating {} ({op})", graph.op_name(op));
        graph.evaluate(op)?;
        pass.executed.push(op);

        for &out in graph.outputs(op) {
            if pass.ready[out.index()] {
                continue;
            }
            pass.ready[out.index()] = true;
            for &consumer in graph.consumers(out) {
                release(&mut pending, &mut queue, consumer);
            }
        }
    }

    Ok(())
}
