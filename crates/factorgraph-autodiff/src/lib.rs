//! Dataflow scheduling and automatic differentiation over factor graphs.
//!
//! A [`Graph`] is a bipartite DAG of named value nodes and operation nodes.
//! Queries name the values they want, and the engine computes only what
//! those values depend on.
//!
//! # Features
//!
//! - **Demand-driven evaluation**: only ancestors of the requested targets run
//! - **Reference-counted scheduling**: an operation fires once all its operands are ready
//! - **Reverse mode AD**: gradients flow from sink seeds through the evaluated subgraph
//! - **Constant isolation**: constant nodes never receive gradients
//!
//! # Architecture
//!
//! 1. **Graph**: Registers nodes and keeps the producer/consumer adjacency
//! 2. **Scheduler**: Computes the required set and runs the forward pass
//! 3. **Backward**: Accumulates gradients in reverse dependency order
//!
//! # Example
//!
//! ```
//! use factorgraph_autodiff::prelude::*;
//!
//! let mut graph = Graph::new();
//! let a = graph.register_value(ValueNode::differentiable("a"), true)?;
//! let b = graph.register_value(ValueNode::differentiable("b"), true)?;
//! let c = graph.register_value(ValueNode::differentiable("c"), true)?;
//! graph.register_operation(OperationNode::new("mul", Box::new(Multiply), &["a", "b"], &["c"]))?;
//!
//! let feeds = FeedDict::new().with("a", scalar(2.0)).with("b", scalar(3.0));
//! let pass = graph.forward(&[c], feeds, 1)?;
//! assert_eq!(graph.get_value(c).unwrap()[(0, 0)], 6.0);
//!
//! graph.backward(&pass, &[c], 1)?;
//! assert_eq!(graph.grad(a).unwrap()[(0, 0)], 3.0);
//! assert_eq!(graph.grad(b).unwrap()[(0, 0)], 2.0);
//! # Ok::<(), GraphError>(())
//! ```

pub mod backward;
pub mod graph;
pub mod operation;
pub mod ops;
pub mod scheduler;
pub mod value;

// Re-export key types
pub use backward::{backward, check_gradients};
pub use graph::Graph;
pub use operation::{Operation, OperationNode, PropagationPolicy};
pub use ops::{Add, Exp, MatMul, Multiply, Negate, ReLU, Scale, Split, Square, Sum};
pub use scheduler::{compute_required, forward, FeedDict, ForwardPass};
pub use value::{ValueKind, ValueNode};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backward::check_gradients;
    pub use crate::graph::Graph;
    pub use crate::operation::{Operation, OperationNode, PropagationPolicy};
    pub use crate::ops::*;
    pub use crate::scheduler::{compute_required, FeedDict, ForwardPass};
    pub use crate::value::{ValueKind, ValueNode};
    pub use factorgraph_core::prelude::*;
}
