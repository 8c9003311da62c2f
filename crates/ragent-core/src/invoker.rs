// Model Invoker
//
// Wraps an LlmDriver behind the conversation's own message model:
// history in, exactly one assistant message out.

use tracing::debug;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::{AgentLoopError, Result};
use crate::llm_drivers::{LlmCallConfig, LlmDriver, LlmMessage, LlmMessageRole};
use crate::message::Message;
use crate::tool_types::ToolDefinition;

/// Invokes the chat model for one conversation step
pub struct ModelInvoker<L: LlmDriver> {
    driver: L,
    config: AgentConfig,
}

impl<L: LlmDriver> ModelInvoker<L> {
    pub fn new(driver: L, config: AgentConfig) -> Self {
        Self { driver, config }
    }

    /// Get reference to the underlying driver
    pub fn driver(&self) -> &L {
        &self.driver
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one inference over `messages`.
    ///
    /// A non-empty `system_prompt` is sent as a leading system message; it is
    /// never part of the returned value. Any driver failure, and expiry of
    /// the configured model timeout, is fatal for the turn.
    pub async fn infer(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        system_prompt: &str,
    ) -> Result<Message> {
        let mut llm_messages = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            llm_messages.push(LlmMessage::text(LlmMessageRole::System, system_prompt));
        }
        llm_messages.extend(messages.iter().map(LlmMessage::from));

        let call_config = LlmCallConfig::from(&self.config).with_tools(tools.to_vec());

        debug!(
            model = %call_config.model,
            message_count = llm_messages.len(),
            tool_count = tools.len(),
            "Invoking model"
        );

        let call = self.driver.chat_completion(llm_messages, &call_config);
        let response = match self.config.model_timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| AgentLoopError::LlmTimeout(timeout))??,
            None => call.await?,
        };

        let message_id = response
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        // Some endpoints omit call IDs; results still need something to correlate on
        let tool_calls = response
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("{}-call-{}", message_id, i);
                }
                call
            })
            .collect();

        Ok(Message::assistant_with_tools(response.text, tool_calls).with_id(message_id))
    }
}
