//! Error types for agentrelay operations

use thiserror::Error;

/// Main error type for agentrelay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Tool arguments or request body did not match the expected shape
    #[error("Validation error: {0}")]
    Validation(String),

    /// A tool with this name is already registered for the agent
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// The agent has no tool with this name
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    /// The tool ran and failed
    #[error("Tool '{tool}' failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    /// The tool did not finish within its time budget
    #[error("Tool '{0}' timed out after {1:?}")]
    ToolTimeout(String, std::time::Duration),

    /// The language-model call failed
    #[error("Provider error: {0}")]
    Provider(String),

    /// The memory backing is unavailable
    #[error("Store error: {0}")]
    Store(String),

    /// No agent is registered under this name
    #[error("Agent '{0}' not found")]
    AgentNotFound(String),

    /// The planning loop hit its round limit without a final answer
    #[error("Agent '{0}' exceeded {1} planning rounds")]
    MaxRoundsExceeded(String, usize),

    /// The streaming client went away before generation finished
    #[error("Client disconnected")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether the error belongs to a single tool call and can be handed back
    /// to the model instead of failing the request.
    pub fn is_tool_level(&self) -> bool {
        matches!(
            self,
            RelayError::Validation(_)
                | RelayError::UnknownTool(_)
                | RelayError::ToolExecution { .. }
                | RelayError::ToolTimeout(..)
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

#[cfg(feature = "persistent")]
impl From<fjall::Error> for RelayError {
    fn from(err: fjall::Error) -> Self {
        RelayError::Store(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for RelayError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        RelayError::Store("lock poisoned".to_string())
    }
}

/// Result type alias for agentrelay operations
pub type RelayResult<T> = Result<T, RelayError>;
