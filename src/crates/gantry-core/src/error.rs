//! Error types for pipeline compilation and execution.

use thiserror::Error;

/// Convenience result type using [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while compiling, validating, or running a
/// pipeline graph.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Graph structure validation failed.
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// A referenced node does not exist in the graph.
    #[error("node '{node}' not found")]
    NodeNotFound { node: String },

    /// A node handler failed in a way the engine could not absorb.
    #[error("node '{node}' execution failed: {error}")]
    NodeExecution { node: String, error: String },

    /// General execution error outside any node handler.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Checkpoint save/load failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// YAML parsing failed.
    #[error("yaml error: {0}")]
    Yaml(String),

    /// Filesystem error from the log store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled by the caller.
    #[error("pipeline cancelled")]
    Cancelled,

    /// An LLM-layer error surfaced outside a handler.
    #[error(transparent)]
    Llm(#[from] gantry_llm::LlmError),

    /// Application-defined error.
    #[error("{0}")]
    Custom(String),
}

impl PipelineError {
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        PipelineError::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        PipelineError::Yaml(err.to_string())
    }
}
