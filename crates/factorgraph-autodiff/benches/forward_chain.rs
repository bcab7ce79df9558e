//! Forward and backward throughput on long operation chains.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use factorgraph_autodiff::prelude::*;

/// Builds `x -> exp -> scale -> ... -> y` with `len` operations.
fn chain(len: usize) -> (Graph, ValueId) {
    let mut graph = Graph::new();
    graph
        .register_value(ValueNode::differentiable("v0"), true)
        .unwrap();
    let mut last = ValueId::new(0);
    for i in 1..=len {
        last = graph
            .register_value(ValueNode::differentiable(format!("v{i}")), true)
            .unwrap();
        let op: Box<dyn Operation> = if i % 2 == 0 {
            Box::new(Scale::new(0.5))
        } else {
            Box::new(Exp)
        };
        graph
            .register_operation(OperationNode::new(
                format!("op{i}"),
                op,
                &[format!("v{}", i - 1)],
                &[format!("v{i}")],
            ))
            .unwrap();
    }
    (graph, last)
}

fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_chain");
    for len in [16, 256, 4096] {
        let (mut graph, target) = chain(len);
        let input = Tensor::from_element(8, 8, 0.01);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                let feeds = FeedDict::new().with("v0", input.clone());
                black_box(graph.forward(&[target], feeds, 1).unwrap());
            })
        });
    }
    group.finish();
}

fn bench_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("backward_chain");
    for len in [16, 256, 4096] {
        let (mut graph, target) = chain(len);
        let feeds = FeedDict::new().with("v0", Tensor::from_element(8, 8, 0.01));
        let pass = graph.forward(&[target], feeds, 1).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| graph.backward(black_box(&pass), &[target], 1).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_forward, bench_backward);
criterion_main!(benches);
