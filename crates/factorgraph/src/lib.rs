//! # factorgraph
//!
//! Demand-driven dataflow graphs with reverse-mode differentiation.
//!
//! A factor graph is a bipartite DAG of named value nodes and operation
//! nodes. A forward query computes only the values its targets depend on.
//! A backward query then accumulates gradients from sink seeds through the
//! subgraph that forward pass evaluated.
//!
//! ## Quick Start
//!
//! ```
//! use factorgraph::prelude::*;
//!
//! let mut graph = Graph::new();
//! for name in ["a", "b", "c", "ab", "y"] {
//!     graph.register_value(ValueNode::differentiable(name), true)?;
//! }
//! graph.register_operation(OperationNode::new("mul", Box::new(Multiply), &["a", "b"], &["ab"]))?;
//! graph.register_operation(OperationNode::new("add", Box::new(Add), &["ab", "c"], &["y"]))?;
//!
//! let y = graph.lookup("y")?;
//! let feeds = FeedDict::new()
//!     .with("a", scalar(2.0))
//!     .with("b", scalar(3.0))
//!     .with("c", scalar(1.0));
//! let pass = graph.forward(&[y], feeds, 1)?;
//! graph.backward(&pass, &[y], 1)?;
//!
//! assert_eq!(graph.get_value(y).unwrap()[(0, 0)], 7.0);
//! assert_eq!(graph.grad(graph.lookup("a")?).unwrap()[(0, 0)], 3.0);
//! # Ok::<(), GraphError>(())
//! ```
//!
//! ## Crates
//!
//! - [`core`]: Tensor alias, node handles, errors and execution configuration
//! - [`autodiff`]: Graph registry, scheduler and backward pass

pub use factorgraph_autodiff as autodiff;
pub use factorgraph_core as core;

pub use nalgebra;

pub use factorgraph_autodiff::{
    check_gradients, FeedDict, ForwardPass, Graph, Operation, OperationNode, PropagationPolicy,
    ValueKind, ValueNode,
};
pub use factorgraph_core::{
    ErrorClass, ExecutionConfig, ExecutionConfigBuilder, ExecutionMode, GraphError, OpId,
    Result, Tensor, ValueId,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use factorgraph_autodiff::prelude::*;
}
