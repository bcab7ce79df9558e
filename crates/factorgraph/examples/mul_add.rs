//! Example: forward and backward passes over `y = a * b + c`
//!
//! Registers a small graph, evaluates it for one set of feeds, prints the
//! gradients, and shows that an unrequested branch is left untouched.

use factorgraph::prelude::*;

fn main() -> Result<()> {
    env_logger::init();

    let mut graph = Graph::new();
    for name in ["a", "b", "c", "ab", "y", "side"] {
        graph.register_value(ValueNode::differentiable(name), true)?;
    }
    graph.register_operation(OperationNode::new("mul", Box::new(Multiply), &["a", "b"], &["ab"]))?;
    graph.register_operation(OperationNode::new("add", Box::new(Add), &["ab", "c"], &["y"]))?;
    graph.register_operation(OperationNode::new("exp", Box::new(Exp), &["c"], &["side"]))?;

    let y = graph.lookup("y")?;
    let side = graph.lookup("side")?;
    let feeds = FeedDict::new()
        .with("a", scalar(2.0))
        .with("b", scalar(3.0))
        .with("c", scalar(1.0));

    let pass = graph.forward(&[y], feeds, 1)?;
    for node in pass.results(&graph) {
        if let Some(value) = node.value() {
            println!("{} = {}", node.name(), value[(0, 0)]);
        }
    }
    println!(
        "executed {} operation(s), skipped {}",
        pass.executed().len(),
        pass.skipped().len()
    );
    println!("side ready: {}", pass.is_ready(side));

    graph.backward(&pass, &[y], 1)?;
    for name in ["a", "b", "c"] {
        let id = graph.lookup(name)?;
        if let Some(grad) = graph.grad(id) {
            println!("dy/d{name} = {}", grad[(0, 0)]);
        }
    }

    Ok(())
}
