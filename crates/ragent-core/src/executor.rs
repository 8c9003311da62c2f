// Tool Call Executor
//
// Turns the tool calls of one assistant message into tool-result messages.
// Tool failures never escape: unknown tools, malformed arguments, tool errors
// and timeouts all become error content so the model can react to them.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::message::Message;
use crate::tool_types::{ToolCall, ToolDefinition};
use crate::traits::ToolExecutor;

/// Executes batches of tool calls against a ToolExecutor
pub struct ToolCallExecutor<T: ToolExecutor> {
    tools: Arc<T>,
    parallel: bool,
    timeout: Option<Duration>,
}

impl<T: ToolExecutor> Clone for ToolCallExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            tools: Arc::clone(&self.tools),
            parallel: self.parallel,
            timeout: self.timeout,
        }
    }
}

impl<T: ToolExecutor> ToolCallExecutor<T> {
    /// Create a sequential executor with no timeout
    pub fn new(tools: T) -> Self {
        Self::with_arc(Arc::new(tools))
    }

    /// Create an executor over an Arc-wrapped ToolExecutor
    pub fn with_arc(tools: Arc<T>) -> Self {
        Self {
            tools,
            parallel: false,
            timeout: None,
        }
    }

    /// Run the calls of one batch concurrently
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Bound every single tool invocation
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get reference to the tool executor
    pub fn tools(&self) -> &T {
        &self.tools
    }

    /// Definitions offered to the model
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.tool_definitions()
    }

    /// Execute `tool_calls`, returning exactly one result message per call in
    /// call order, even when the calls run concurrently.
    pub async fn execute(&self, tool_calls: &[ToolCall]) -> ToolBatch {
        let outcomes = if self.parallel && tool_calls.len() > 1 {
            debug!(count = tool_calls.len(), "Executing tool calls in parallel");
            join_all(tool_calls.iter().map(|call| self.execute_one(call))).await
        } else {
            let mut outcomes = Vec::with_capacity(tool_calls.len());
            for call in tool_calls {
                outcomes.push(self.execute_one(call).await);
            }
            outcomes
        };

        let error_count = outcomes.iter().filter(|(_, failed)| *failed).count();
        ToolBatch {
            messages: outcomes.into_iter().map(|(message, _)| message).collect(),
            error_count,
        }
    }

    /// The result message, and whether the call failed
    async fn execute_one(&self, call: &ToolCall) -> (Message, bool) {
        info!(tool_call_id = %call.id, tool_name = %call.name, "Executing tool");

        let invocation = self.tools.invoke(&call.name, &call.arguments);
        let outcome = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, invocation)
                .await
                .unwrap_or_else(|_| {
                    Err(ToolError::Timeout {
                        tool: call.name.clone(),
                        timeout,
                    })
                }),
            None => invocation.await,
        };

        let failed = outcome.is_err();
        let content = match outcome {
            Ok(value) => render_value(value),
            Err(err) => {
                warn!(
                    tool_call_id = %call.id,
                    tool_name = %call.name,
                    kind = err.kind(),
                    error = %err,
                    "Tool call failed"
                );
                err.to_content()
            }
        };

        (Message::tool_result(call, content), failed)
    }
}

/// Results of one batch of tool calls
#[derive(Debug, Clone, PartialEq)]
pub struct ToolBatch {
    /// One tool-result message per call, in call order
    pub messages: Vec<Message>,
    /// Calls that ended in a ToolError
    pub error_count: usize,
}

/// Strings are passed through as-is, anything else as compact JSON
fn render_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
