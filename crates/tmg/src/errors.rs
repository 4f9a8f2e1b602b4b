use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Render timed out: {0}")]
    RenderTimeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Short name of the error variant, shown to the model
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::ToolNotFound(_) => "ToolNotFound",
            AgentError::InvalidParameters(_) => "InvalidParameters",
            AgentError::ExecutionError(_) => "ExecutionError",
            AgentError::RenderTimeout(_) => "RenderTimeout",
            AgentError::Internal(_) => "Internal",
        }
    }

    fn detail(&self) -> &str {
        match self {
            AgentError::ToolNotFound(s)
            | AgentError::InvalidParameters(s)
            | AgentError::ExecutionError(s)
            | AgentError::RenderTimeout(s)
            | AgentError::Internal(s) => s,
        }
    }

    /// Render the error as a function result the model can read and react to
    pub fn to_tool_output(&self) -> String {
        match self {
            AgentError::ToolNotFound(name) => format!("unknown tool: {}", name),
            other => format!("{}: {}", other.kind(), other.detail()),
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
