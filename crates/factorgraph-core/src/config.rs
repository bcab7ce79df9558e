//! Execution configuration for forward and backward queries.
//!
//! The thread count is the extensibility seam for a future parallel
//! scheduler. Only single-threaded execution is implemented: any other
//! count resolves to [`GraphError::UnsupportedMode`] before any node is
//! evaluated.

use crate::error::{GraphError, Result};

/// Strategy used to drain the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ExecutionMode {
    /// One operation at a time, in queue order.
    Sequential,
}

impl ExecutionMode {
    /// Resolves a requested thread count to an implemented mode.
    pub fn from_threads(threads: usize) -> Result<Self> {
        match threads {
            1 => Ok(Self::Sequential),
            other => Err(GraphError::UnsupportedMode { threads: other }),
        }
    }
}

/// Configuration for a single query.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionConfig {
    /// Number of worker threads requested.
    pub threads: usize,
    /// Log per-operation scheduling decisions at debug level instead of trace.
    pub trace_schedule: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            trace_schedule: false,
        }
    }
}

impl ExecutionConfig {
    /// Configuration requesting `threads` workers with default settings.
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    /// Resolves the configured thread count to an execution mode.
    pub fn mode(&self) -> Result<ExecutionMode> {
        ExecutionMode::from_threads(self.threads)
    }
}

/// Builder for creating a custom execution configuration.
pub struct ExecutionConfigBuilder {
    config: ExecutionConfig,
}

impl ExecutionConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ExecutionConfig::default(),
        }
    }

    /// Set the number of worker threads.
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    /// Enable or disable debug-level scheduling logs.
    pub fn trace_schedule(mut self, enabled: bool) -> Self {
        self.config.trace_schedule = enabled;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ExecutionConfig {
        self.config
    }
}

impl Default for ExecutionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
