// Message types
//
// Message is one turn in a conversation. Messages are never mutated after
// construction; the conversation state only ever appends them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool_types::ToolCall;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Instructions; never stored in history by the loop
    System,
    User,
    /// Assistant response, possibly requesting tools
    Assistant,
    /// Output of one tool call
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// One entry of the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID; generated when the caller does not provide one
    #[serde(default = "new_message_id")]
    pub id: String,

    pub role: MessageRole,

    /// May be empty on assistant messages that only call tools
    #[serde(default)]
    pub content: String,

    /// Tool name (tool-result messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls requested by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// ID of the tool call this message answers (tool-result messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// Assistant turn requesting tools; no calls means a plain answer
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::assistant(content);
        if !tool_calls.is_empty() {
            msg.tool_calls = Some(tool_calls);
        }
        msg
    }

    /// Result for `tool_call`, with an ID derived from the call ID
    pub fn tool_result(tool_call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            id: format!("{}-result", tool_call.id),
            role: MessageRole::Tool,
            content: content.into(),
            name: Some(tool_call.name.clone()),
            tool_calls: None,
            tool_call_id: Some(tool_call.id.clone()),
        }
    }

    /// Replace the generated ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }

    /// Tool calls carried by this message (empty if none)
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "Hello");
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn test_assistant_with_empty_tools_is_plain() {
        let msg = Message::assistant_with_tools("done", Vec::new());
        assert!(msg.tool_calls.is_none());
    }

    #[test]
    fn test_tool_result_message() {
        let call = ToolCall::new("call_123", "search", serde_json::json!({"query": "x"}));
        let msg = Message::tool_result(&call, "found");

        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_123"));
        assert_eq!(msg.name.as_deref(), Some("search"));
        assert_eq!(msg.id, "call_123-result");
    }

    #[test]
    fn test_deserialize_without_id() {
        let msg: Message = serde_json::from_str(r#"{"role": "user", "content": "hi"}"#).unwrap();
        assert!(!msg.id.is_empty());
        assert_eq!(msg.role, MessageRole::User);
    }

    #[test]
    fn test_serialization_omits_absent_fields() {
        let json = serde_json::to_value(Message::user("hi").with_id("m1")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "m1", "role": "user", "content": "hi"})
        );
    }
}
