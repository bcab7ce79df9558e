//! Core types and errors for the factorgraph dataflow engine.
//!
//! This crate holds the pieces shared by every other crate in the
//! workspace: the value type carried through the graph, the dense node
//! handles, the error taxonomy and the per-query execution configuration.
//!
//! # Modules
//!
//! - [`config`]: Execution configuration and mode selection
//! - [`error`]: Error types for registration and execution
//! - [`types`]: Tensor alias and node handles

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{ExecutionConfig, ExecutionConfigBuilder, ExecutionMode};
pub use error::{ErrorClass, GraphError, NodeKind, Result};
pub use types::{scalar, shape_of, OpId, Shape, Tensor, ValueId};

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use factorgraph_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ExecutionConfig, ExecutionConfigBuilder, ExecutionMode};
    pub use crate::error::{ErrorClass, GraphError, NodeKind, Result};
    pub use crate::types::{scalar, shape_of, OpId, Shape, Tensor, ValueId};
}
