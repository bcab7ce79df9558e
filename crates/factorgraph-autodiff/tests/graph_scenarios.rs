//! End-to-end scenarios for forward and backward passes.

use approx::assert_relative_eq;
use factorgraph_autodiff::prelude::*;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Wraps an operation and counts forward invocations.
#[derive(Debug)]
struct Counted {
    inner: Box<dyn Operation>,
    calls: Arc<AtomicUsize>,
}

impl Counted {
    fn new(inner: impl Operation + 'static) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = Self {
            inner: Box::new(inner),
            calls: Arc::clone(&calls),
        };
        (op, calls)
    }
}

impl Operation for Counted {
    fn forward(&self, operands: &[&Tensor]) -> Result<Vec<Tensor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.forward(operands)
    }

    fn backward(
        &self,
        operands: &[&Tensor],
        outputs: &[&Tensor],
        output_grads: &[&Tensor],
    ) -> Result<Vec<Tensor>> {
        self.inner.backward(operands, outputs, output_grads)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

fn values(graph: &mut Graph, names: &[&str]) -> Vec<ValueId> {
    names
        .iter()
        .map(|name| {
            graph
                .register_value(ValueNode::differentiable(*name), true)
                .unwrap()
        })
        .collect()
}

#[test]
fn test_multiply_forward_and_backward() {
    init_logger();
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["a", "b", "c"]);
    let (a, b, c) = (ids[0], ids[1], ids[2]);
    graph
        .register_operation(OperationNode::new("mul", Box::new(Multiply), &["a", "b"], &["c"]))
        .unwrap();

    let feeds = FeedDict::new().with("a", scalar(2.0)).with("b", scalar(3.0));
    let pass = graph.forward(&[c], feeds, 1).unwrap();

    let results = pass.results(&graph);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name(), "c");
    assert_eq!(results[0].value().unwrap()[(0, 0)], 6.0);

    graph.backward(&pass, &[c], 1).unwrap();
    assert_eq!(graph.grad(a).unwrap()[(0, 0)], 3.0);
    assert_eq!(graph.grad(b).unwrap()[(0, 0)], 2.0);
}

#[test]
fn test_unrequested_branch_is_never_evaluated() {
    init_logger();
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["a", "d", "e"]);
    let (d, e) = (ids[1], ids[2]);
    let (double, calls) = Counted::new(Scale::new(2.0));
    graph
        .register_operation(OperationNode::new("square", Box::new(Square), &["a"], &["d"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new("double", Box::new(double), &["a"], &["e"]))
        .unwrap();

    let pass = graph
        .forward(&[d], FeedDict::new().with("a", scalar(5.0)), 1)
        .unwrap();

    assert_eq!(graph.get_value(d).unwrap()[(0, 0)], 25.0);
    assert!(!pass.is_ready(e));
    assert!(graph.get_value(e).is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(pass.skipped(), [graph.lookup_op("double").unwrap()]);
}

#[test]
fn test_multi_threaded_request_evaluates_nothing() {
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["a", "b", "c"]);
    let (mul, calls) = Counted::new(Multiply);
    graph
        .register_operation(OperationNode::new("mul", Box::new(mul), &["a", "b"], &["c"]))
        .unwrap();

    let feeds = FeedDict::new().with("a", scalar(2.0)).with("b", scalar(3.0));
    let err = graph.forward(&[ids[2]], feeds, 4).unwrap_err();

    assert_eq!(err, GraphError::UnsupportedMode { threads: 4 });
    assert_eq!(err.class(), ErrorClass::UnsupportedMode);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(graph.get_value(ids[0]).is_none());
    assert!(graph.get_value(ids[2]).is_none());
}

#[test]
fn test_backward_from_non_sink_fails() {
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["a", "b", "c", "d"]);
    graph
        .register_operation(OperationNode::new("mul", Box::new(Multiply), &["a", "b"], &["c"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new("neg", Box::new(Negate), &["c"], &["d"]))
        .unwrap();

    let feeds = FeedDict::new().with("a", scalar(2.0)).with("b", scalar(3.0));
    let pass = graph.forward(&[ids[3]], feeds, 1).unwrap();

    let err = graph.backward(&pass, &[ids[2]], 1).unwrap_err();
    assert_eq!(err.class(), ErrorClass::TopologyMisuse);
    assert_eq!(err.to_string(), "only allow backprop from top variables: c has 1 consumer(s)");
}

#[test]
fn test_forward_is_idempotent() {
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["a", "b", "c", "d", "y"]);
    let y = ids[4];
    graph
        .register_operation(OperationNode::new("mul", Box::new(Multiply), &["a", "b"], &["c"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new("exp", Box::new(Exp), &["c"], &["d"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new("add", Box::new(Add), &["d", "a"], &["y"]))
        .unwrap();

    let feeds: FeedDict = [("a", scalar(0.5)), ("b", scalar(-1.5))]
        .into_iter()
        .collect();

    let first = graph.forward(&[y], feeds.clone(), 1).unwrap();
    let first_value = graph.get_value(y).unwrap().clone();
    let second = graph.forward(&[y], feeds, 1).unwrap();

    assert_eq!(first, second);
    assert_eq!(graph.get_value(y).unwrap(), &first_value);
}

#[test]
fn test_ready_operands_do_not_trigger_unrequired_operations() {
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["a", "b", "c", "side"]);
    let (extra, calls) = Counted::new(Add);
    graph
        .register_operation(OperationNode::new("mul", Box::new(Multiply), &["a", "b"], &["c"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new("extra", Box::new(extra), &["a", "b"], &["side"]))
        .unwrap();

    let feeds = FeedDict::new().with("a", scalar(1.0)).with("b", scalar(2.0));
    let pass = graph.forward(&[ids[2]], feeds, 1).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!pass.is_required(ids[3]));
    assert!(pass.is_ready(ids[2]));
}

#[test]
fn test_chain_gradients_match_analytic_derivatives() {
    init_logger();
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["a", "b", "c", "ab", "y"]);
    let (a, b, c, y) = (ids[0], ids[1], ids[2], ids[4]);
    graph
        .register_operation(OperationNode::new("mul", Box::new(Multiply), &["a", "b"], &["ab"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new("add", Box::new(Add), &["ab", "c"], &["y"]))
        .unwrap();

    let feeds = FeedDict::new()
        .with("a", scalar(1.5))
        .with("b", scalar(-4.0))
        .with("c", scalar(7.0));
    let pass = graph.forward(&[y], feeds, 1).unwrap();
    assert_relative_eq!(graph.get_value(y).unwrap()[(0, 0)], 1.0);

    graph.backward(&pass, &[y], 1).unwrap();
    assert_relative_eq!(graph.grad(a).unwrap()[(0, 0)], -4.0);
    assert_relative_eq!(graph.grad(b).unwrap()[(0, 0)], 1.5);
    assert_relative_eq!(graph.grad(c).unwrap()[(0, 0)], 1.0);
}

#[test]
fn test_constant_gradient_untouched() {
    let mut graph = Graph::new();
    let w = graph
        .register_value(ValueNode::constant("w").with_value(scalar(2.0)), false)
        .unwrap();
    let ids = values(&mut graph, &["x", "wx", "y"]);
    graph
        .register_operation(OperationNode::new("mul", Box::new(Multiply), &["w", "x"], &["wx"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new("sq", Box::new(Square), &["wx"], &["y"]))
        .unwrap();

    assert!(graph.grad(w).is_none());
    for x in [1.0, -3.0] {
        let pass = graph
            .forward(&[ids[2]], FeedDict::new().with("x", scalar(x)), 1)
            .unwrap();
        graph.backward(&pass, &[ids[2]], 1).unwrap();

        assert!(graph.grad(w).is_none());
        assert_eq!(graph.get_value(w).unwrap()[(0, 0)], 2.0);
        // dy/dx = 2 * w * (w * x) = 8x
        assert_relative_eq!(graph.grad(ids[0]).unwrap()[(0, 0)], 8.0 * x);
    }
}

#[test]
fn test_gradients_reset_between_passes() {
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["x", "y"]);
    graph
        .register_operation(OperationNode::new("sq", Box::new(Square), &["x"], &["y"]))
        .unwrap();

    for _ in 0..3 {
        let pass = graph
            .forward(&[ids[1]], FeedDict::new().with("x", scalar(3.0)), 1)
            .unwrap();
        graph.backward(&pass, &[ids[1]], 1).unwrap();
    }
    assert_eq!(graph.grad(ids[0]).unwrap()[(0, 0)], 6.0);
}

#[test]
fn test_multi_output_operation_backward() {
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["x", "pos", "neg", "p2", "n2", "y"]);
    let (x, y) = (ids[0], ids[5]);
    graph
        .register_operation(OperationNode::new("split", Box::new(Split), &["x"], &["pos", "neg"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new(
            "triple",
            Box::new(Scale::new(3.0)),
            &["pos"],
            &["p2"],
        ))
        .unwrap();
    graph
        .register_operation(OperationNode::new("sq", Box::new(Square), &["neg"], &["n2"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new("add", Box::new(Add), &["p2", "n2"], &["y"]))
        .unwrap();

    let x_value = Tensor::from_row_slice(1, 3, &[1.0, -2.0, 0.5]);
    let pass = graph
        .forward(&[y], FeedDict::new().with("x", x_value.clone()), 1)
        .unwrap();
    graph.backward(&pass, &[y], 1).unwrap();

    // y = 3x + x^2  =>  dy/dx = 3 + 2x
    let expected = x_value.map(|v| 3.0 + 2.0 * v);
    assert_relative_eq!(graph.grad(x).unwrap(), &expected, epsilon = 1e-12);
}

#[test]
fn test_finite_difference_check_on_relu_network() {
    init_logger();
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["w", "x", "h", "r", "loss"]);
    let (w, loss) = (ids[0], ids[4]);
    graph
        .register_operation(OperationNode::new("matmul", Box::new(MatMul), &["w", "x"], &["h"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new("relu", Box::new(ReLU), &["h"], &["r"]))
        .unwrap();
    graph
        .register_operation(OperationNode::new("sum", Box::new(Sum), &["r"], &["loss"]))
        .unwrap();

    let feeds = FeedDict::new()
        .with("w", Tensor::from_row_slice(2, 3, &[0.4, -0.3, 0.9, 1.1, 0.2, -0.7]))
        .with("x", Tensor::from_row_slice(3, 1, &[1.0, 0.5, 2.0]));

    let error = check_gradients(&mut graph, loss, &feeds, w, 1e-6).unwrap();
    assert!(error < 1e-6, "max relative error {error}");
}

#[test]
fn test_execution_config_with_tracing() {
    init_logger();
    let mut graph = Graph::new();
    let ids = values(&mut graph, &["a", "b"]);
    graph
        .register_operation(OperationNode::new("neg", Box::new(Negate), &["a"], &["b"]))
        .unwrap();

    let config = ExecutionConfigBuilder::new().trace_schedule(true).build();
    let pass = graph
        .forward_with(&[ids[1]], FeedDict::new().with("a", scalar(1.0)), &config)
        .unwrap();
    graph.backward_with(&pass, &[ids[1]], &config).unwrap();

    assert_eq!(graph.get_value(ids[1]).unwrap()[(0, 0)], -1.0);
    assert_eq!(graph.grad(ids[0]).unwrap()[(0, 0)], -1.0);
}
