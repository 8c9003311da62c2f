// In-memory implementations for testing and examples
//
// MockLlmDriver replays scripted responses without network access.
// The response for a call is picked from the conversation itself (the number
// of assistant turns since the last user message), so re-running the same
// input always reaches the same script entry.
//
// EchoTool and FailingTool are minimal tools for exercising the registry
// and the loop.

use async_trait::async_trait;
use futures::stream;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{AgentLoopError, Result};
use crate::llm_drivers::{
    LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmMessage, LlmMessageRole,
    LlmResponseStream, LlmStreamEvent,
};
use crate::tool_types::ToolCall;
use crate::tools::{Tool, ToolOutcome};

// ============================================================================
// MockLlmResponse
// ============================================================================

/// A scripted LLM response
#[derive(Debug, Clone)]
pub struct MockLlmResponse {
    pub id: Option<String>,
    pub text: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub failure: Option<MockFailure>,
}

/// How a scripted response fails
#[derive(Debug, Clone, PartialEq)]
pub enum MockFailure {
    /// The request itself is rejected
    Request(String),
    /// Text is streamed, then the stream reports an error
    MidStream(String),
}

impl MockLlmResponse {
    /// Create a text-only response
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            tool_calls: None,
            failure: None,
        }
    }

    /// Create a response with tool calls
    pub fn with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::text(text)
        }
    }

    /// Create a response whose request fails
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            failure: Some(MockFailure::Request(message.into())),
            ..Self::text("")
        }
    }

    /// Create a response that streams `text` and then fails
    pub fn stream_error(text: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            failure: Some(MockFailure::MidStream(message.into())),
            ..Self::text(text)
        }
    }

    /// Override the response ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

// ============================================================================
// MockLlmDriver
// ============================================================================

/// A recorded call to the mock driver
#[derive(Debug, Clone)]
pub struct MockLlmCall {
    pub messages: Vec<LlmMessage>,
    pub config: LlmCallConfig,
}

/// Mock LLM driver for testing
///
/// Clones share the same script and call log.
#[derive(Debug, Clone, Default)]
pub struct MockLlmDriver {
    responses: Arc<RwLock<Vec<MockLlmResponse>>>,
    call_log: Arc<RwLock<Vec<MockLlmCall>>>,
    delay: Option<Duration>,
}

impl MockLlmDriver {
    /// Create a new mock driver with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock driver with the given script
    pub fn with_responses(responses: Vec<MockLlmResponse>) -> Self {
        Self {
            responses: Arc::new(RwLock::new(responses)),
            ..Self::default()
        }
    }

    /// Sleep for `delay` before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add a response to the script
    pub async fn add_response(&self, response: MockLlmResponse) {
        self.responses.write().await.push(response);
    }

    /// Get the call log
    pub async fn calls(&self) -> Vec<MockLlmCall> {
        self.call_log.read().await.clone()
    }

    /// Number of calls received so far
    pub async fn call_count(&self) -> usize {
        self.call_log.read().await.len()
    }

    /// Index of the script entry answering `messages`
    fn turn_index(messages: &[LlmMessage]) -> usize {
        let since_user = messages
            .iter()
            .rposition(|m| m.role == LlmMessageRole::User)
            .map_or(messages, |i| &messages[i + 1..]);
        since_user
            .iter()
            .filter(|m| m.role == LlmMessageRole::Assistant)
            .count()
    }

    fn user_turns(messages: &[LlmMessage]) -> usize {
        messages
            .iter()
            .filter(|m| m.role == LlmMessageRole::User)
            .count()
    }
}

#[async_trait]
impl LlmDriver for MockLlmDriver {
    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let turn = Self::turn_index(&messages);
        let id = format!("mock-{}-{}", Self::user_turns(&messages), turn);

        self.call_log.write().await.push(MockLlmCall {
            messages,
            config: config.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .responses
            .read()
            .await
            .get(turn)
            .cloned()
            .unwrap_or_else(|| MockLlmResponse::text("Mock response (no more responses configured)"));

        if let Some(MockFailure::Request(message)) = &response.failure {
            return Err(AgentLoopError::llm(message.clone()));
        }

        let mut events = Vec::new();
        if !response.text.is_empty() {
            events.push(Ok(LlmStreamEvent::TextDelta(response.text.clone())));
        }
        if let Some(MockFailure::MidStream(message)) = response.failure {
            events.push(Ok(LlmStreamEvent::Error(message)));
            return Ok(Box::pin(stream::iter(events)));
        }
        if let Some(tool_calls) = response.tool_calls {
            events.push(Ok(LlmStreamEvent::ToolCalls(tool_calls)));
        }
        events.push(Ok(LlmStreamEvent::Done(LlmCompletionMetadata {
            id: Some(response.id.unwrap_or(id)),
            model: Some(config.model.clone()),
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        })));

        Ok(Box::pin(stream::iter(events)))
    }
}

// ============================================================================
// Test tools
// ============================================================================

/// Returns its `message` argument unchanged
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Repeat the given message"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolOutcome {
        match arguments.get("message") {
            Some(Value::String(message)) => ToolOutcome::output(message.as_str()),
            Some(other) => ToolOutcome::output(other.to_string()),
            None => ToolOutcome::output(""),
        }
    }
}

/// Fails on every call, either visibly to the model or internally
pub struct FailingTool {
    message: String,
    internal: bool,
}

impl FailingTool {
    /// Rejects calls with `message`
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            internal: false,
        }
    }

    /// Fails internally with `message` (kept out of the conversation)
    pub fn crashing(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            internal: true,
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing_tool"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Value) -> ToolOutcome {
        if self.internal {
            ToolOutcome::internal(anyhow::anyhow!(self.message.clone()))
        } else {
            ToolOutcome::rejected(self.message.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn config() -> LlmCallConfig {
        LlmCallConfig::from(&AgentConfig::default())
    }

    #[tokio::test]
    async fn test_script_follows_conversation_turns() {
        let driver = MockLlmDriver::with_responses(vec![
            MockLlmResponse::with_tools("", vec![ToolCall::new("c1", "echo", json!({}))]),
            MockLlmResponse::text("final"),
        ]);

        let first = driver
            .chat_completion(vec![LlmMessage::text(LlmMessageRole::User, "hi")], &config())
            .await
            .unwrap();
        assert!(first.tool_calls.is_some());
        assert_eq!(first.id.as_deref(), Some("mock-1-0"));

        let second = driver
            .chat_completion(
                vec![
                    LlmMessage::text(LlmMessageRole::User, "hi"),
                    LlmMessage::text(LlmMessageRole::Assistant, ""),
                    LlmMessage::text(LlmMessageRole::Tool, "ok"),
                ],
                &config(),
            )
            .await
            .unwrap();
        assert_eq!(second.text, "final");
        assert_eq!(driver.call_count().await, 2);
    }

    #[tokio::test]
    async fn test_same_input_same_response() {
        let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::text("a")]);
        let input = vec![LlmMessage::text(LlmMessageRole::User, "hi")];

        let a = driver.chat_completion(input.clone(), &config()).await.unwrap();
        let b = driver.chat_completion(input, &config()).await.unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_responses_added_through_a_clone() {
        let driver = MockLlmDriver::new();
        driver.clone().add_response(MockLlmResponse::text("late")).await;

        let response = driver
            .chat_completion(vec![LlmMessage::text(LlmMessageRole::User, "hi")], &config())
            .await
            .unwrap();
        assert_eq!(response.text, "late");
    }

    #[tokio::test]
    async fn test_request_error() {
        let driver = MockLlmDriver::with_responses(vec![MockLlmResponse::error("boom")]);
        let err = driver
            .chat_completion(vec![LlmMessage::text(LlmMessageRole::User, "hi")], &config())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentLoopError::Llm(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let out = EchoTool.execute(json!({"message": "Hello"})).await;
        assert!(matches!(out, ToolOutcome::Output(v) if v == json!("Hello")));
    }
}
