//! Backward pass implementation for automatic differentiation.
//!
//! Gradients flow from sink seeds back through the subgraph evaluated by a
//! [`ForwardPass`]. Operations are released in reverse dependency order by
//! pending counters: an operation runs only once every downstream
//! contribution to its outputs has been accumulated.

use crate::graph::Graph;
use crate::scheduler::{compute_required, release, schedule_level, FeedDict, ForwardPass};
use factorgraph_core::{ExecutionConfig, ExecutionMode, GraphError, OpId, Result, Tensor, ValueId};
use log::{debug, log};
use std::collections::VecDeque;

/// Performs backward pass (backpropagation) through the graph.
///
/// # Arguments
/// * `graph` - The computation graph
/// * `pass` - The forward pass whose subgraph is differentiated
/// * `seeds` - Sink nodes whose gradient is seeded with ones
/// * `config` - Execution configuration
///
/// Every seed must be a ready, required, non-constant node with no consumer
/// operations. All seeds are validated before any accumulator is touched.
pub fn backward(
    graph: &mut Graph,
    pass: &ForwardPass,
    seeds: &[ValueId],
    config: &ExecutionConfig,
) -> Result<()> {
    let mode = config.mode()?;
    pass.check_consistent(graph)?;

    let mut unique: Vec<ValueId> = Vec::with_capacity(seeds.len());
    for &seed in seeds {
        graph.check_value(seed)?;
        if unique.contains(&seed) {
            continue;
        }
        validate_seed(graph, pass, seed)?;
        unique.push(seed);
    }

    graph.zero_grads();
    for &seed in &unique {
        graph.seed_grad(seed)?;
    }

    match mode {
        ExecutionMode::Sequential => sequential_backward(graph, pass, &unique, config),
        _ => Err(GraphError::UnsupportedMode {
            threads: config.threads,
        }),
    }
}

/// Fails unless backward may start from `seed`.
fn validate_seed(graph: &Graph, pass: &ForwardPass, seed: ValueId) -> Result<()> {
    let name = graph.value_name(seed);
    let consumers = graph.consumers(seed).len();
    if consumers > 0 {
        return Err(GraphError::NotASink { name, consumers });
    }
    if graph.value(seed).is_some_and(|node| node.is_const()) {
        return Err(GraphError::ConstantSeed { name });
    }
    if !pass.is_required(seed) {
        return Err(GraphError::inconsistent_pass(format!(
            "seed {name} is outside the forward pass's required set"
        )));
    }
    if !pass.is_ready(seed) {
        return Err(GraphError::not_ready(name));
    }
    Ok(())
}

/// Initial pending counters for a backward pass.
///
/// Only outputs that are required and lead to a seed gate an operation.
/// Each such output counts once per consumer edge into the seed's ancestor
/// subgraph, plus once if it is a seed itself.
fn pending_counts(graph: &Graph, pass: &ForwardPass, seeds: &[ValueId]) -> Result<Vec<usize>> {
    let upstream = compute_required(graph, seeds)?;
    let relevant: Vec<bool> = (0..graph.op_count())
        .map(|i| {
            graph
                .outputs(OpId::new(i))
                .iter()
                .any(|out| upstream[out.index()])
        })
        .collect();

    let pending: Vec<usize> = (0..graph.op_count())
        .map(|i| {
            graph
                .outputs(OpId::new(i))
                .iter()
                .filter(|&&out| upstream[out.index()] && pass.is_required(out))
                .map(|&out| {
                    let edges = graph
                        .consumers(out)
                        .iter()
                        .filter(|consumer| relevant[consumer.index()])
                        .count();
                    edges + usize::from(seeds.contains(&out))
                })
                .sum()
        })
        .collect();
    Ok(pending)
}

/// Drains the reverse queue on the calling thread.
fn sequential_backward(
    graph: &mut Graph,
    pass: &ForwardPass,
    seeds: &[ValueId],
    config: &ExecutionConfig,
) -> Result<()> {
    let level = schedule_level(config);
    let mut executed = vec![false; graph.op_count()];
    for &op in pass.executed() {
        executed[op.index()] = true;
    }

    let mut pending = pending_counts(graph, pass, seeds)?;
    let mut queue = VecDeque::new();
    for &seed in seeds {
        for &op in graph.producers(seed) {
            release(&mut pending, &mut queue, op);
        }
    }

    let mut differentiated = 0usize;
    let mut visited = 0usize;
    while let Some(op) = queue.pop_front() {
        visited += 1;
        let propagates = graph
            .operation(op)
            .is_some_and(|node| node.policy().propagates());
        let has_trainable_operand = graph
            .operands(op)
            .iter()
            .any(|&v| graph.value(v).is_some_and(|node| !node.is_const()));

        if propagates && has_trainable_operand && executed[op.index()] {
            log!(level, "Differentiating {} ({op})", graph.op_name(op));
            graph.differentiate(op)?;
            differentiated += 1;
        } else {
            log!(level, "Passing through {} ({op})", graph.op_name(op));
        }

        // Counters advance even when the gradient computation was skipped.
        for &operand in graph.operands(op) {
            for &producer in graph.producers(operand) {
                release(&mut pending, &mut queue, producer);
            }
        }
    }

    debug!(
        "Backward pass: {} operation(s) visited, {} differentiated",
        visited, differentiated
    );
    Ok(())
}

/// Checks gradients using finite differences.
///
/// This is useful for verifying the correctness of backward implementations.
/// The loss is the sum of the elements of `target`, which matches seeding
/// `target` with ones.
///
/// # Arguments
/// * `graph` - The computation graph
/// * `target` - A sink node
/// * `feeds` - Values fed to the forward pass; must include `wrt`
/// * `wrt` - The fed node to check the gradient for
/// * `epsilon` - Small value for finite differences
///
/// # Returns
/// The maximum relative error between analytical and numerical gradients
pub fn check_gradients(
    graph: &mut Graph,
    target: ValueId,
    feeds: &FeedDict,
    wrt: ValueId,
    epsilon: f64,
) -> Result<f64> {
    let wrt_name = graph.value_name(wrt);
    let original: Tensor = feeds
        .get(&wrt_name)
        .map(|value| (**value).clone())
        .ok_or_else(|| GraphError::not_ready(&wrt_name))?;

    let pass = graph.forward(&[target], feeds.clone(), 1)?;
    graph.backward(&pass, &[target], 1)?;
    let analytical = graph
        .grad(wrt)
        .cloned()
        .ok_or_else(|| GraphError::not_ready(&wrt_name))?;

    let mut loss_at = |value: Tensor| -> Result<f64> {
        let mut perturbed = feeds.clone();
        perturbed.insert(wrt_name.clone(), value);
        graph.forward(&[target], perturbed, 1)?;
        graph
            .get_value(target)
            .map(Tensor::sum)
            .ok_or_else(|| GraphError::not_ready(graph.value_name(target)))
    };

    let mut max_error: f64 = 0.0;
    for i in 0..original.nrows() {
        for j in 0..original.ncols() {
            let mut plus = original.clone();
            plus[(i, j)] += epsilon;
            let f_plus = loss_at(plus)?;

            let mut minus = original.clone();
            minus[(i, j)] -= epsilon;
            let f_minus = loss_at(minus)?;

            let numerical = (f_plus - f_minus) / (2.0 * epsilon);
            let analytic = analytical[(i, j)];
            let denom = numerical.abs().max(analytic.abs()).max(1e-8);
            max_error = max_error.max((numerical - analytic).abs() / denom);
        }
    }

    // Recompute with original values
    graph.forward(&[target], feeds.clone(), 1)?;
    Ok(max_error)
}
