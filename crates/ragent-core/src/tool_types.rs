// Tool definitions and tool calls
//
// Design Decision: Tools are identified by name (string) for extensibility.
// Dispatch happens through the ToolRegistry, which looks tools up by name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition passed to the model.
///
/// Carries everything the model needs to decide whether to call a tool:
/// its name, a human-readable description and a JSON schema for arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (used by the model and for registry lookup)
    pub name: String,
    /// Tool description for the model
    pub description: String,
    /// JSON schema for tool parameters
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Names listed in the schema's `required` array
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Tool call emitted by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// Arguments as JSON
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_parameters() {
        let def = ToolDefinition::new(
            "search",
            "Search documents",
            serde_json::json!({
                "type": "object",
                "properties": {"query": {"type": "string"}, "k": {"type": "integer"}},
                "required": ["query"]
            }),
        );

        assert_eq!(def.required_parameters(), vec!["query"]);
    }

    #[test]
    fn test_required_parameters_absent() {
        let def = ToolDefinition::new("noop", "", serde_json::json!({"type": "object"}));
        assert!(def.required_parameters().is_empty());
    }

    #[test]
    fn test_tool_call_deserialization() {
        let json = r#"{"id": "call_1", "name": "search", "arguments": {"query": "MLOps"}}"#;
        let call: ToolCall = serde_json::from_str(json).unwrap();

        assert_eq!(call.id, "call_1");
        assert_eq!(call.arguments["query"], "MLOps");
    }
}
