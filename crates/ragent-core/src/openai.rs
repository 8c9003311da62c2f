// OpenAI-compatible LLM Driver
//
// Implementation of LlmDriver for OpenAI-compatible chat-completions APIs,
// which includes Databricks model serving endpoints.
//
// Tool-call fragments arrive spread over many SSE chunks; they are
// accumulated by index and emitted once, when the choice finishes.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentLoopError, Result};
use crate::llm_drivers::{
    LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmMessage, LlmMessageRole,
    LlmResponseStream, LlmStreamEvent, TokenUsage,
};
use crate::tool_types::{ToolCall, ToolDefinition};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible LLM Driver
///
/// Supports streaming responses and tool calls.
///
/// # Example
///
/// ```ignore
/// use ragent_core::openai::OpenAILlmDriver;
///
/// let driver = OpenAILlmDriver::for_databricks("https://my-workspace.cloud.databricks.com", token);
/// // or with a custom endpoint
/// let driver = OpenAILlmDriver::with_base_url("api-key", "https://api.example.com/v1/chat/completions");
/// ```
#[derive(Clone)]
pub struct OpenAILlmDriver {
    client: Client,
    api_key: String,
    api_url: String,
}

impl OpenAILlmDriver {
    /// Create a new driver with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_API_URL)
    }

    /// Create a new driver with a custom API URL (for OpenAI-compatible APIs)
    pub fn with_base_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }

    /// Create a driver for a Databricks workspace.
    ///
    /// The serving endpoint is selected by the `model` of each call.
    pub fn for_databricks(host: impl AsRef<str>, token: impl Into<String>) -> Self {
        let url = format!(
            "{}/serving-endpoints/chat/completions",
            host.as_ref().trim_end_matches('/')
        );
        Self::with_base_url(token, url)
    }

    /// Get the API URL
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn convert_message(msg: &LlmMessage) -> OpenAiMessage {
        let tool_calls = msg.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|tc| OpenAiToolCall {
                    id: tc.id.clone(),
                    r#type: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: tc.name.clone(),
                        arguments: match &tc.arguments {
                            Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        },
                    },
                })
                .collect::<Vec<_>>()
        });

        // Assistant turns that only call tools carry no content
        let content = if msg.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(msg.content.clone())
        };

        OpenAiMessage {
            role: msg.role.as_str().to_string(),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                r#type: "function".to_string(),
                function: OpenAiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }
}

#[async_trait]
impl LlmDriver for OpenAILlmDriver {
    async fn chat_completion_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let request = OpenAiRequest {
            model: config.model.clone(),
            messages: messages.iter().map(Self::convert_message).collect(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: true,
            tools: (!config.tools.is_empty()).then(|| Self::convert_tools(&config.tools)),
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentLoopError::llm(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentLoopError::llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let events = Box::pin(response.bytes_stream().eventsource());
        let accumulator = StreamAccumulator::new(config.model.clone());

        let converted = stream::unfold(Some((events, accumulator)), |state| async move {
            let (mut events, mut acc) = state?;
            loop {
                match events.next().await {
                    Some(Ok(event)) => {
                        let out = acc.on_data(&event.data);
                        if out.is_empty() {
                            continue;
                        }
                        let finished = out.iter().any(|e| {
                            matches!(e, LlmStreamEvent::Done(_) | LlmStreamEvent::Error(_))
                        });
                        let next = if finished { None } else { Some((events, acc)) };
                        return Some((out, next));
                    }
                    Some(Err(e)) => {
                        return Some((
                            vec![LlmStreamEvent::Error(format!("Stream error: {}", e))],
                            None,
                        ))
                    }
                    // Stream closed without a [DONE] sentinel
                    None => return Some((acc.finish(), None)),
                }
            }
        })
        .flat_map(|events| stream::iter(events.into_iter().map(Ok)));

        Ok(Box::pin(converted))
    }
}

impl std::fmt::Debug for OpenAILlmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAILlmDriver")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Stream accumulation
// ============================================================================

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn into_tool_call(self) -> ToolCall {
        let arguments = if self.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            // Unparseable arguments are kept verbatim; the registry rejects them
            serde_json::from_str(&self.arguments).unwrap_or(Value::String(self.arguments))
        };
        ToolCall::new(self.id, self.name, arguments)
    }
}

struct StreamAccumulator {
    model: String,
    response_id: Option<String>,
    tool_calls: Vec<PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl StreamAccumulator {
    fn new(model: String) -> Self {
        Self {
            model,
            response_id: None,
            tool_calls: Vec::new(),
            finish_reason: None,
            usage: None,
        }
    }

    fn on_data(&mut self, data: &str) -> Vec<LlmStreamEvent> {
        if data.trim() == "[DONE]" {
            return self.finish();
        }

        let chunk: OpenAiStreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => return vec![LlmStreamEvent::Error(format!("Failed to parse chunk: {}", e))],
        };

        if self.response_id.is_none() {
            self.response_id = chunk.id;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        let mut out = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return out;
        };

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let idx = tc.index as usize;
            if idx > self.tool_calls.len() {
                return vec![LlmStreamEvent::Error(format!(
                    "Tool call index {idx} skips ahead of {} known calls",
                    self.tool_calls.len()
                ))];
            }
            if idx == self.tool_calls.len() {
                self.tool_calls.push(PartialToolCall::default());
            }
            let slot = &mut self.tool_calls[idx];
            if let Some(id) = tc.id {
                slot.id = id;
            }
            if let Some(function) = tc.function {
                if let Some(name) = function.name {
                    slot.name = name;
                }
                if let Some(args) = function.arguments {
                    slot.arguments.push_str(&args);
                }
            }
        }

        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            out.push(LlmStreamEvent::TextDelta(content));
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
            if let Some(calls) = self.take_tool_calls() {
                out.push(LlmStreamEvent::ToolCalls(calls));
            }
        }

        out
    }

    fn take_tool_calls(&mut self) -> Option<Vec<ToolCall>> {
        if self.tool_calls.is_empty() {
            return None;
        }
        Some(
            self.tool_calls
                .drain(..)
                .map(PartialToolCall::into_tool_call)
                .collect(),
        )
    }

    fn finish(&mut self) -> Vec<LlmStreamEvent> {
        let mut out = Vec::new();
        if let Some(calls) = self.take_tool_calls() {
            out.push(LlmStreamEvent::ToolCalls(calls));
        }
        out.push(LlmStreamEvent::Done(LlmCompletionMetadata {
            id: self.response_id.take(),
            model: Some(self.model.clone()),
            finish_reason: self.finish_reason.take(),
            usage: self.usage.take(),
        }));
        out
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(chunks: &[Value]) -> String {
        let mut body: String = chunks
            .iter()
            .map(|c| format!("data: {}\n\n", c))
            .collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn serve(server: &MockServer, body: String) {
        Mock::given(method("POST"))
            .and(path("/serving-endpoints/chat/completions"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    fn call_config() -> LlmCallConfig {
        LlmCallConfig::from(&AgentConfig::new("", "databricks-claude-sonnet-4"))
    }

    #[test]
    fn test_for_databricks_url() {
        let driver = OpenAILlmDriver::for_databricks("https://example.cloud.databricks.com/", "t");
        assert_eq!(
            driver.api_url(),
            "https://example.cloud.databricks.com/serving-endpoints/chat/completions"
        );
        assert!(!format!("{:?}", driver).contains("\"t\""));
    }

    #[test]
    fn test_tool_only_assistant_message_has_no_content() {
        let msg = LlmMessage {
            role: LlmMessageRole::Assistant,
            content: String::new(),
            tool_calls: Some(vec![ToolCall::new("c1", "search", json!({"query": "q"}))]),
            tool_call_id: None,
        };
        let converted = serde_json::to_value(OpenAILlmDriver::convert_message(&msg)).unwrap();

        assert!(converted.get("content").is_none());
        assert_eq!(
            converted["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"q"}"#
        );
    }

    #[tokio::test]
    async fn test_streams_text_and_response_id() {
        let server = MockServer::start().await;
        let body = sse(&[
            json!({"id": "chatcmpl-1", "choices": [{"delta": {"role": "assistant", "content": "MLOps "}}]}),
            json!({"id": "chatcmpl-1", "choices": [{"delta": {"content": "is a practice."}}]}),
            json!({"id": "chatcmpl-1", "choices": [{"delta": {}, "finish_reason": "stop"}]}),
        ]);
        serve(&server, body).await;

        let driver = OpenAILlmDriver::for_databricks(server.uri(), "test-token");
        let response = driver
            .chat_completion(
                vec![LlmMessage::text(LlmMessageRole::User, "What is MLOps?")],
                &call_config(),
            )
            .await
            .unwrap();

        assert_eq!(response.text, "MLOps is a practice.");
        assert_eq!(response.id.as_deref(), Some("chatcmpl-1"));
        assert!(response.tool_calls.is_none());
        assert_eq!(response.metadata.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_accumulates_tool_call_fragments() {
        let server = MockServer::start().await;
        let body = sse(&[
            json!({"id": "r2", "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "docs__index", "arguments": "{\"que"}}
            ]}}]}),
            json!({"id": "r2", "choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "ry\": \"MLOps\"}"}}
            ]}}]}),
            json!({"id": "r2", "choices": [{"delta": {"tool_calls": [
                {"index": 1, "id": "call_b", "function": {"name": "broken", "arguments": "{not json"}}
            ]}}]}),
            json!({"id": "r2", "choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ]);
        serve(&server, body).await;

        let driver = OpenAILlmDriver::for_databricks(server.uri(), "test-token");
        let response = driver
            .chat_completion(
                vec![LlmMessage::text(LlmMessageRole::User, "search")],
                &call_config(),
            )
            .await
            .unwrap();

        let calls = response.tool_calls.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name, "docs__index");
        assert_eq!(calls[0].arguments, json!({"query": "MLOps"}));
        assert_eq!(calls[1].arguments, json!("{not json"));
    }

    #[test]
    fn test_out_of_range_tool_call_index_is_rejected() {
        let mut acc = StreamAccumulator::new("m".into());
        let chunk = json!({"choices": [{"delta": {"tool_calls": [
            {"index": 4000000000u32, "id": "call_x", "function": {"name": "echo"}}
        ]}}]});

        let events = acc.on_data(&chunk.to_string());

        assert!(matches!(events.as_slice(), [LlmStreamEvent::Error(msg)] if msg.contains("4000000000")));
        assert!(acc.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_request_carries_tools_and_model() {
        let server = MockServer::start().await;
        serve(
            &server,
            sse(&[json!({"choices": [{"delta": {"content": "ok"}, "finish_reason": "stop"}]})]),
        )
        .await;

        let driver = OpenAILlmDriver::for_databricks(server.uri(), "test-token");
        let config = call_config().with_tools(vec![ToolDefinition::new(
            "echo",
            "Echo",
            json!({"type": "object"}),
        )]);
        driver
            .chat_completion(vec![LlmMessage::text(LlmMessageRole::User, "hi")], &config)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["model"], "databricks-claude-sonnet-4");
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["function"]["name"], "echo");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_error_status_is_llm_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let driver = OpenAILlmDriver::for_databricks(server.uri(), "test-token");
        let err = driver
            .chat_completion(vec![], &call_config())
            .await
            .unwrap_err();

        match err {
            AgentLoopError::Llm(msg) => {
                assert!(msg.contains("429"));
                assert!(msg.contains("rate limited"));
            }
            other => panic!("Expected Llm error, got {other:?}"),
        }
    }
}
