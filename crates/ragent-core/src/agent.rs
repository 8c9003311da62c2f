// Chat Agent Facade
//
// ChatAgent exposes the conversation loop through a chat-agent style
// request/response interface:
// - predict: run to completion, return every produced message
// - predict_stream: yield one chunk per produced message as it appears
//
// Context and custom inputs are accepted and logged; they do not change
// orchestration.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::error::Result;
use crate::llm_drivers::LlmDriver;
use crate::message::Message;
use crate::r#loop::ConversationLoop;
use crate::traits::ToolExecutor;

/// Stream of response chunks
pub type ChatAgentChunkStream = Pin<Box<dyn Stream<Item = Result<ChatAgentChunk>> + Send>>;

// ============================================================================
// Request / response types
// ============================================================================

/// Optional caller context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Inbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAgentRequest {
    /// Conversation history, oldest first
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ChatContext>,

    /// Free-form pass-through inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_inputs: Option<Map<String, Value>>,

    /// Ask the serving harness for a streamed response
    #[serde(default)]
    pub stream: bool,
}

impl ChatAgentRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            context: None,
            custom_inputs: None,
            stream: false,
        }
    }

    pub fn with_context(mut self, context: ChatContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_custom_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.custom_inputs = Some(inputs);
        self
    }

    fn conversation_id(&self) -> Option<&str> {
        self.context
            .as_ref()
            .and_then(|c| c.conversation_id.as_deref())
    }
}

/// Batch response: every message produced during the turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAgentResponse {
    pub messages: Vec<Message>,
}

/// One streamed unit, wrapping a single produced message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAgentChunk {
    pub delta: Message,
}

// ============================================================================
// ChatAgent
// ============================================================================

/// Request/response facade over a ConversationLoop
///
/// Cheap to clone; clones share the same loop.
pub struct ChatAgent<L, T>
where
    L: LlmDriver,
    T: ToolExecutor,
{
    inner: Arc<ConversationLoop<L, T>>,
}

impl<L, T> Clone for ChatAgent<L, T>
where
    L: LlmDriver,
    T: ToolExecutor,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L, T> ChatAgent<L, T>
where
    L: LlmDriver + 'static,
    T: ToolExecutor + 'static,
{
    /// Wrap an existing loop
    pub fn new(conversation_loop: ConversationLoop<L, T>) -> Self {
        Self {
            inner: Arc::new(conversation_loop),
        }
    }

    /// Build the loop and the facade in one go
    pub fn from_parts(config: AgentConfig, llm_driver: L, tool_executor: T) -> Self {
        Self::new(ConversationLoop::new(config, llm_driver, tool_executor))
    }

    /// Get reference to the underlying loop
    pub fn conversation_loop(&self) -> &ConversationLoop<L, T> {
        &self.inner
    }

    /// Run the turn to completion and return every produced message
    pub async fn predict(&self, request: ChatAgentRequest) -> Result<ChatAgentResponse> {
        Self::log_request(&request);
        let conversation_id = request.conversation_id().map(str::to_owned);

        let result = self.inner.run(request.messages).await?;

        info!(
            conversation_id = conversation_id.as_deref().unwrap_or("-"),
            produced = result.messages.len(),
            iterations = result.iterations,
            truncated = result.truncated,
            "Prediction completed"
        );

        Ok(ChatAgentResponse {
            messages: result.messages,
        })
    }

    /// Stream the turn, one chunk per produced message
    pub fn predict_stream(&self, request: ChatAgentRequest) -> ChatAgentChunkStream {
        Self::log_request(&request);

        let chunks = Arc::clone(&self.inner)
            .run_stream(request.messages)
            .map(|item| item.map(|delta| ChatAgentChunk { delta }));

        Box::pin(chunks)
    }

    fn log_request(request: &ChatAgentRequest) {
        debug!(
            conversation_id = request.conversation_id().unwrap_or("-"),
            message_count = request.messages.len(),
            custom_input_keys = ?request
                .custom_inputs
                .as_ref()
                .map(|m| m.keys().cloned().collect::<Vec<_>>()),
            "Received chat agent request"
        );
    }
}
