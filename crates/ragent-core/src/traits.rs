// Core traits for pluggable backends
//
// The conversation loop only talks to tools through ToolExecutor, so the
// registry can be swapped for remote dispatch or test doubles.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;
use crate::tool_types::ToolDefinition;

// ============================================================================
// ToolExecutor - name-keyed tool dispatch
// ============================================================================

/// Trait for resolving and invoking tools by name
///
/// Implementations can:
/// - Dispatch to in-process `Tool` implementations (ToolRegistry)
/// - Forward to a remote execution service
/// - Return canned results for testing
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions of every available tool, in a stable order
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Invoke the tool called `name` with `arguments`
    async fn invoke(&self, name: &str, arguments: &Value) -> Result<Value, ToolError>;
}
