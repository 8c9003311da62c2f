// Model drivers
//
// The conversation loop talks to chat models only through LlmDriver. A driver
// streams LlmStreamEvents for one completion; the non-streaming call is the
// folded stream, so a driver only has to implement streaming.
//
// Drivers: openai.rs (OpenAI-compatible HTTP endpoints, including Databricks
// model serving) and memory.rs (scripted, for tests).

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;

use crate::config::AgentConfig;
use crate::error::{AgentLoopError, Result};
use crate::message::{Message, MessageRole};
use crate::tool_types::{ToolCall, ToolDefinition};

// ============================================================================
// Streaming
// ============================================================================

pub type LlmResponseStream = Pin<Box<dyn Stream<Item = Result<LlmStreamEvent>> + Send>>;

/// One event of a streamed completion
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    /// Next piece of assistant text
    TextDelta(String),
    /// Complete tool calls (emitted once all fragments have arrived)
    ToolCalls(Vec<ToolCall>),
    /// Last event of a successful completion
    Done(LlmCompletionMetadata),
    /// The provider aborted the completion
    Error(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmCompletionMetadata {
    /// Provider response ID; becomes the assistant message ID
    pub id: Option<String>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Token accounting as reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ============================================================================
// LlmDriver
// ============================================================================

#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Start a completion for `messages` and stream its events
    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream>;

    /// Run a completion to the end
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        let stream = self.chat_completion_stream(messages, config).await?;
        LlmResponse::collect(stream).await
    }
}

#[async_trait]
impl LlmDriver for Box<dyn LlmDriver> {
    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        (**self).chat_completion_stream(messages, config).await
    }

    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        (**self).chat_completion(messages, config).await
    }
}

/// Driver chosen at runtime
pub type BoxedLlmDriver = Box<dyn LlmDriver>;

// ============================================================================
// Messages
// ============================================================================

/// A conversation message in the shape drivers send to the model
#[derive(Debug, Clone, PartialEq)]
pub struct LlmMessage {
    pub role: LlmMessageRole,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
}

impl LlmMessage {
    pub fn text(role: LlmMessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl LlmMessageRole {
    /// Wire name used by chat-completions APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmMessageRole::System => "system",
            LlmMessageRole::User => "user",
            LlmMessageRole::Assistant => "assistant",
            LlmMessageRole::Tool => "tool",
        }
    }
}

impl From<MessageRole> for LlmMessageRole {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::System => LlmMessageRole::System,
            MessageRole::User => LlmMessageRole::User,
            MessageRole::Assistant => LlmMessageRole::Assistant,
            MessageRole::Tool => LlmMessageRole::Tool,
        }
    }
}

impl From<&Message> for LlmMessage {
    fn from(msg: &Message) -> Self {
        LlmMessage {
            role: msg.role.into(),
            content: msg.content.clone(),
            tool_calls: msg.has_tool_calls().then(|| msg.tool_calls().to_vec()),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

// ============================================================================
// Call configuration and response
// ============================================================================

/// Per-call model settings plus the tools on offer
#[derive(Debug, Clone, PartialEq)]
pub struct LlmCallConfig {
    /// Model or serving endpoint name
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
}

impl From<&AgentConfig> for LlmCallConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            tools: Vec::new(),
        }
    }
}

impl LlmCallConfig {
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A finished completion
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub id: Option<String>,
    pub text: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub metadata: LlmCompletionMetadata,
}

impl LlmResponse {
    /// Fold a completion stream. Text deltas are concatenated in order; an
    /// in-stream error fails the whole completion.
    pub async fn collect(mut stream: LlmResponseStream) -> Result<Self> {
        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut metadata = LlmCompletionMetadata::default();

        while let Some(event) = stream.next().await {
            match event? {
                LlmStreamEvent::TextDelta(delta) => text += &delta,
                LlmStreamEvent::ToolCalls(calls) => tool_calls.extend(calls),
                LlmStreamEvent::Done(done) => metadata = done,
                LlmStreamEvent::Error(message) => return Err(AgentLoopError::llm(message)),
            }
        }

        Ok(Self {
            id: metadata.id.clone(),
            text,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    struct ScriptedDriver {
        events: Vec<LlmStreamEvent>,
    }

    #[async_trait]
    impl LlmDriver for ScriptedDriver {
        async fn chat_completion_stream(
            &self,
            _messages: Vec<LlmMessage>,
            _config: &LlmCallConfig,
        ) -> Result<LlmResponseStream> {
            let events: Vec<Result<LlmStreamEvent>> =
                self.events.iter().cloned().map(Ok).collect();
            Ok(Box::pin(stream::iter(events)))
        }
    }

    fn call_config() -> LlmCallConfig {
        LlmCallConfig::from(&AgentConfig::default())
    }

    #[tokio::test]
    async fn test_chat_completion_folds_stream() {
        let driver = ScriptedDriver {
            events: vec![
                LlmStreamEvent::TextDelta("Hello, ".into()),
                LlmStreamEvent::TextDelta("world".into()),
                LlmStreamEvent::ToolCalls(vec![ToolCall::new("c1", "echo", json!({}))]),
                LlmStreamEvent::Done(LlmCompletionMetadata {
                    id: Some("resp-1".into()),
                    usage: Some(TokenUsage {
                        prompt_tokens: 12,
                        completion_tokens: 3,
                        total_tokens: 15,
                    }),
                    ..Default::default()
                }),
            ],
        };

        let response = driver.chat_completion(vec![], &call_config()).await.unwrap();
        assert_eq!(response.text, "Hello, world");
        assert_eq!(response.id.as_deref(), Some("resp-1"));
        assert_eq!(response.tool_calls.unwrap().len(), 1);
        assert_eq!(response.metadata.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_text_only_completion_has_no_tool_calls() {
        let driver = ScriptedDriver {
            events: vec![LlmStreamEvent::TextDelta("hi".into())],
        };
        let response = driver.chat_completion(vec![], &call_config()).await.unwrap();
        assert!(response.tool_calls.is_none());
        assert!(response.id.is_none());
    }

    #[tokio::test]
    async fn test_stream_error_fails_completion() {
        let driver: BoxedLlmDriver = Box::new(ScriptedDriver {
            events: vec![
                LlmStreamEvent::TextDelta("partial".into()),
                LlmStreamEvent::Error("connection reset".into()),
            ],
        });

        let err = driver
            .chat_completion(vec![], &call_config())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentLoopError::Llm(msg) if msg == "connection reset"));
    }

    #[test]
    fn test_conversion_keeps_tool_linkage() {
        let call = ToolCall::new("call_9", "search", json!({"query": "x"}));
        let assistant = Message::assistant_with_tools("", vec![call.clone()]);
        let result = Message::tool_result(&call, "[]");

        let llm_assistant = LlmMessage::from(&assistant);
        assert_eq!(llm_assistant.role, LlmMessageRole::Assistant);
        assert_eq!(llm_assistant.tool_calls, Some(vec![call]));

        let llm_result = LlmMessage::from(&result);
        assert_eq!(llm_result.role, LlmMessageRole::Tool);
        assert_eq!(llm_result.tool_call_id.as_deref(), Some("call_9"));
        assert!(llm_result.tool_calls.is_none());
    }

    #[test]
    fn test_usage_tolerates_missing_fields() {
        let usage: TokenUsage = serde_json::from_str(r#"{"total_tokens": 7}"#).unwrap();
        assert_eq!(usage.total_tokens, 7);
        assert_eq!(usage.prompt_tokens, 0);
    }

    #[test]
    fn test_call_config_from_agent_config() {
        let agent = AgentConfig::new("sys", "endpoint").with_temperature(0.2);
        let config = LlmCallConfig::from(&agent);

        assert_eq!(config.model, "endpoint");
        assert_eq!(config.temperature, Some(0.2));
        assert!(config.tools.is_empty());
    }
}
