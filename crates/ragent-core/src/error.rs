// Error types for the conversation loop
//
// Two families of errors exist:
// - AgentLoopError is fatal for a request and propagates to the facade caller
// - ToolError is recovered locally and rendered into tool-result content

use std::time::Duration;

use thiserror::Error;

/// Result type alias for conversation loop operations
pub type Result<T> = std::result::Result<T, AgentLoopError>;

/// Errors that abort a conversation turn
#[derive(Debug, Error)]
pub enum AgentLoopError {
    /// LLM driver or transport error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Model call exceeded the configured timeout
    #[error("LLM call timed out after {0:?}")]
    LlmTimeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No messages to process
    #[error("No messages to process")]
    NoMessages,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentLoopError {
    /// Create an LLM error
    pub fn llm(msg: impl Into<String>) -> Self {
        AgentLoopError::Llm(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AgentLoopError::Configuration(msg.into())
    }
}

/// Errors raised while invoking a single tool.
///
/// These never abort the loop. The executor turns them into a tool-result
/// message so the model can observe the failure and react to it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    /// The model asked for a tool that is not registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The tool ran and reported a failure
    #[error("{0}")]
    Execution(String),

    /// Arguments did not match the tool's parameter schema
    #[error("Malformed arguments for tool '{tool}': {reason}")]
    MalformedToolCall { tool: String, reason: String },

    /// The tool did not finish within the configured timeout
    #[error("Tool '{tool}' timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    /// System-level failure; details are logged, never shown to the model
    #[error("An internal error occurred while executing the tool")]
    Internal(String),
}

impl ToolError {
    /// Create a tool execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        ToolError::Execution(msg.into())
    }

    /// Create a malformed tool call error
    pub fn malformed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        ToolError::MalformedToolCall {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable kind, included in error content
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::Execution(_) => "tool_execution_error",
            ToolError::MalformedToolCall { .. } => "malformed_tool_call",
            ToolError::Timeout { .. } => "tool_timeout",
            ToolError::Internal(_) => "internal_error",
        }
    }

    /// Structured error description used as tool-result content
    pub fn to_content(&self) -> String {
        serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        })
        .to_string()
    }
}

/// Errors raised while assembling a tool registry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool with the same name is already registered
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),
}

/// Errors raised by external tool collaborators (vector search, function catalog)
#[derive(Debug, Error)]
pub enum ToolkitError {
    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote service answered with a non-success status
    #[error("Request to {endpoint} failed ({status}): {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Remote payload did not have the expected shape
    #[error("Unexpected response: {0}")]
    Protocol(String),

    /// Invalid collaborator configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The remote operation ran and reported a failure
    #[error("{0}")]
    Remote(String),
}

impl ToolkitError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        ToolkitError::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ToolkitError::Configuration(msg.into())
    }
}
