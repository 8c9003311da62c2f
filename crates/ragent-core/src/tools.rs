// Tools and the tool registry
//
// A Tool is one named capability the model may call: a description, a JSON
// schema for its arguments and an async body. The ToolRegistry owns the
// tools offered for a conversation, keeps them in registration order (which
// is the order definitions are shown to the model) and dispatches calls by
// name after checking the arguments against the schema's required keys.
//
// Tool bodies report one of three outcomes. Rejections are shown to the
// model verbatim; internal failures are logged and reach the model only as
// a generic message.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::error;

use crate::error::{RegistryError, ToolError};
use crate::tool_types::ToolDefinition;
use crate::toolkits::Toolkit;
use crate::traits::ToolExecutor;

// ============================================================================
// ToolOutcome
// ============================================================================

/// What a tool body produced
#[derive(Debug)]
pub enum ToolOutcome {
    /// Value handed back to the model
    Output(Value),
    /// The tool refused or failed in a way the model can act on
    /// ("index not found", "division by zero")
    Rejected(String),
    /// Transport, credential or other infrastructure failure
    Internal(anyhow::Error),
}

impl ToolOutcome {
    pub fn output(value: impl Into<Value>) -> Self {
        ToolOutcome::Output(value.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        ToolOutcome::Rejected(message.into())
    }

    pub fn internal(error: impl Into<anyhow::Error>) -> Self {
        ToolOutcome::Internal(error.into())
    }

    pub fn is_output(&self) -> bool {
        matches!(self, ToolOutcome::Output(_))
    }

    /// Map onto the registry's error type, logging internal failures
    pub fn into_result(self, tool_name: &str) -> Result<Value, ToolError> {
        match self {
            ToolOutcome::Output(value) => Ok(value),
            ToolOutcome::Rejected(message) => Err(ToolError::Execution(message)),
            ToolOutcome::Internal(err) => {
                error!(tool_name = %tool_name, error = ?err, "Tool failed internally");
                Err(ToolError::Internal(format!("{err:#}")))
            }
        }
    }
}

// ============================================================================
// Tool
// ============================================================================

/// A capability the model can invoke by name.
///
/// ```ignore
/// struct Clock;
///
/// #[async_trait]
/// impl Tool for Clock {
///     fn name(&self) -> &str { "utc_now" }
///     fn description(&self) -> &str { "Current UTC time, RFC 3339" }
///     fn parameters_schema(&self) -> Value { json!({"type": "object", "properties": {}}) }
///     async fn execute(&self, _args: Value) -> ToolOutcome {
///         ToolOutcome::output(chrono::Utc::now().to_rfc3339())
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls the tool by; unique within a registry
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the argument object
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `arguments` is always an object holding every key the
    /// schema lists as required.
    async fn execute(&self, arguments: Value) -> ToolOutcome;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters_schema())
    }
}

// ============================================================================
// ToolRegistry
// ============================================================================

/// Ordered set of uniquely named tools.
///
/// ```ignore
/// let registry = ToolRegistry::builder()
///     .tool(retriever)
///     .toolkit(&functions)
///     .build()?;
/// ```
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; a second tool with the same name is rejected
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_boxed(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        self.register_arc(Arc::from(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Add every tool a toolkit produces, keeping the toolkit's order.
    ///
    /// Stops at the first duplicate; tools registered before it stay.
    pub fn register_toolkit(&mut self, toolkit: &dyn Toolkit) -> Result<(), RegistryError> {
        toolkit
            .tools()
            .into_iter()
            .try_for_each(|tool| self.register_arc(tool))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    pub fn has(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names in registration order
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn list(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tool_names()).finish()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    async fn invoke(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let Some(tool) = self.get(name) else {
            return Err(ToolError::UnknownTool(name.to_string()));
        };

        let arguments = checked_arguments(&tool.to_definition(), arguments)?;
        tool.execute(Value::Object(arguments)).await.into_result(name)
    }
}

/// Normalise `arguments` to an object holding every required key.
///
/// A missing argument payload (`null`) counts as `{}`.
fn checked_arguments(
    definition: &ToolDefinition,
    arguments: &Value,
) -> Result<Map<String, Value>, ToolError> {
    let object = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        Value::String(_) => {
            return Err(ToolError::malformed(
                &definition.name,
                "expected a JSON object, got string",
            ))
        }
        Value::Array(_) => {
            return Err(ToolError::malformed(
                &definition.name,
                "expected a JSON object, got array",
            ))
        }
        Value::Bool(_) | Value::Number(_) => {
            return Err(ToolError::malformed(
                &definition.name,
                "expected a JSON object, got scalar",
            ))
        }
    };

    if let Some(missing) = definition
        .required_parameters()
        .into_iter()
        .find(|key| !object.contains_key(*key))
    {
        return Err(ToolError::malformed(
            &definition.name,
            format!("missing required argument '{missing}'"),
        ));
    }

    Ok(object)
}

// ============================================================================
// ToolRegistryBuilder
// ============================================================================

/// Chained registration; `build` reports the first duplicate, if any
#[derive(Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
    first_error: Option<RegistryError>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool(self, tool: impl Tool + 'static) -> Self {
        self.tool_arc(Arc::new(tool))
    }

    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        let result = self.registry.register_arc(tool);
        self.keep_first(result)
    }

    pub fn toolkit(mut self, toolkit: &dyn Toolkit) -> Self {
        let result = self.registry.register_toolkit(toolkit);
        self.keep_first(result)
    }

    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        match self.first_error {
            Some(err) => Err(err),
            None => Ok(self.registry),
        }
    }

    fn keep_first(mut self, result: Result<(), RegistryError>) -> Self {
        if let Err(err) = result {
            self.first_error.get_or_insert(err);
        }
        self
    }
}
