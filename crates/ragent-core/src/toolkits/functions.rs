// Function Toolkit
//
// Exposes catalog functions (`catalog.schema.function`) as tools. Metadata
// is resolved once, when the toolkit is built; every tool call runs the
// function through a SQL warehouse.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{tool_name_for, toolkit_error_result, DatabricksWorkspace, Toolkit};
use crate::error::ToolkitError;
use crate::tools::{Tool, ToolOutcome};

/// Statement wait timeout passed to the SQL statement API
const STATEMENT_WAIT_TIMEOUT: &str = "30s";

/// Return type marker of table-valued functions
const TABLE_TYPE: &str = "TABLE_TYPE";

// ============================================================================
// Function metadata
// ============================================================================

/// Catalog metadata for one function
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionInfo {
    pub full_name: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// Return type name, `TABLE_TYPE` for table-valued functions
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub input_params: Option<FunctionParameterInfos>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct FunctionParameterInfos {
    #[serde(default)]
    pub parameters: Vec<FunctionParameterInfo>,
}

/// One input parameter of a function
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionParameterInfo {
    pub name: String,
    /// SQL type name, e.g. `STRING`, `INT`, `ARRAY`
    pub type_name: String,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub parameter_default: Option<String>,
}

impl FunctionInfo {
    /// Input parameters, ordered by position
    pub fn parameters(&self) -> Vec<&FunctionParameterInfo> {
        let mut params: Vec<&FunctionParameterInfo> = self
            .input_params
            .as_ref()
            .map(|p| p.parameters.iter().collect())
            .unwrap_or_default();
        params.sort_by_key(|p| p.position.unwrap_or(u32::MAX));
        params
    }

    pub fn is_table_function(&self) -> bool {
        self.data_type.as_deref() == Some(TABLE_TYPE)
    }

    /// JSON schema for the function's arguments
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in self.parameters() {
            let mut schema = json!({"type": json_type_for(&param.type_name)});
            if let Some(comment) = &param.comment {
                schema["description"] = json!(comment);
            }
            properties.insert(param.name.clone(), schema);
            if param.parameter_default.is_none() {
                required.push(param.name.clone());
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// JSON schema type for a SQL type name
fn json_type_for(sql_type: &str) -> &'static str {
    match sql_type.to_ascii_uppercase().as_str() {
        "BYTE" | "SHORT" | "INT" | "LONG" => "integer",
        "FLOAT" | "DOUBLE" | "DECIMAL" => "number",
        "BOOLEAN" => "boolean",
        "ARRAY" => "array",
        "MAP" | "STRUCT" => "object",
        _ => "string",
    }
}

// ============================================================================
// FunctionClient
// ============================================================================

/// Backend resolving and executing catalog functions
#[async_trait]
pub trait FunctionClient: Send + Sync {
    /// Fetch metadata for a fully qualified function name
    async fn get_function(&self, full_name: &str) -> Result<FunctionInfo, ToolkitError>;

    /// List every function of `catalog.schema`
    async fn list_functions(
        &self,
        catalog: &str,
        schema: &str,
    ) -> Result<Vec<FunctionInfo>, ToolkitError>;

    /// Run `function` with named arguments
    async fn execute_function(
        &self,
        function: &FunctionInfo,
        arguments: &Map<String, Value>,
    ) -> Result<Value, ToolkitError>;
}

/// Databricks Unity Catalog functions, executed on a SQL warehouse
#[derive(Debug, Clone)]
pub struct DatabricksFunctionClient {
    workspace: DatabricksWorkspace,
    warehouse_id: String,
}

impl DatabricksFunctionClient {
    pub fn new(workspace: DatabricksWorkspace, warehouse_id: impl Into<String>) -> Self {
        Self {
            workspace,
            warehouse_id: warehouse_id.into(),
        }
    }

    fn statement_for(function: &FunctionInfo, arguments: &Map<String, Value>) -> (String, Vec<Value>) {
        let mut call_args = Vec::new();
        let mut parameters = Vec::new();

        for param in function.parameters() {
            let Some(value) = arguments.get(&param.name) else {
                continue;
            };
            call_args.push(format!("{0} => :{0}", param.name));
            let value = match value {
                Value::Null => Value::Null,
                Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            };
            parameters.push(json!({
                "name": param.name,
                "value": value,
                "type": param.type_name,
            }));
        }

        let call = format!("{}({})", function.full_name, call_args.join(", "));
        let statement = if function.is_table_function() {
            format!("SELECT * FROM {call}")
        } else {
            format!("SELECT {call}")
        };
        (statement, parameters)
    }
}

#[async_trait]
impl FunctionClient for DatabricksFunctionClient {
    async fn get_function(&self, full_name: &str) -> Result<FunctionInfo, ToolkitError> {
        let path = format!("/api/2.1/unity-catalog/functions/{full_name}");
        self.workspace.get_json(&path, &[]).await
    }

    async fn list_functions(
        &self,
        catalog: &str,
        schema: &str,
    ) -> Result<Vec<FunctionInfo>, ToolkitError> {
        let response: FunctionList = self
            .workspace
            .get_json(
                "/api/2.1/unity-catalog/functions",
                &[("catalog_name", catalog), ("schema_name", schema)],
            )
            .await?;
        Ok(response.functions)
    }

    async fn execute_function(
        &self,
        function: &FunctionInfo,
        arguments: &Map<String, Value>,
    ) -> Result<Value, ToolkitError> {
        let (statement, parameters) = Self::statement_for(function, arguments);
        debug!(function = %function.full_name, statement = %statement, "Executing function");

        let body = json!({
            "warehouse_id": self.warehouse_id,
            "statement": statement,
            "parameters": parameters,
            "wait_timeout": STATEMENT_WAIT_TIMEOUT,
            "on_wait_timeout": "CANCEL",
            "format": "JSON_ARRAY",
            "disposition": "INLINE",
        });
        let response: StatementResponse = self
            .workspace
            .post_json("/api/2.0/sql/statements", &body)
            .await?;

        response.into_value(function.is_table_function())
    }
}

#[derive(Debug, Deserialize)]
struct FunctionList {
    #[serde(default)]
    functions: Vec<FunctionInfo>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    status: StatementStatus,
    #[serde(default)]
    manifest: Option<StatementManifest>,
    #[serde(default)]
    result: Option<StatementResult>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    #[serde(default)]
    error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementManifest {
    schema: StatementSchema,
}

#[derive(Debug, Deserialize)]
struct StatementSchema {
    #[serde(default)]
    columns: Vec<StatementColumn>,
}

#[derive(Debug, Deserialize)]
struct StatementColumn {
    name: String,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data_array: Vec<Vec<Value>>,
}

impl StatementResponse {
    fn into_value(self, table: bool) -> Result<Value, ToolkitError> {
        match self.status.state.as_str() {
            "SUCCEEDED" => {}
            "FAILED" => {
                let message = self
                    .status
                    .error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Function execution failed".to_string());
                return Err(ToolkitError::Remote(message));
            }
            other => {
                return Err(ToolkitError::Remote(format!(
                    "Function execution did not complete (state {other})"
                )))
            }
        }

        let rows = self.result.map(|r| r.data_array).unwrap_or_default();
        if !table {
            return Ok(rows
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or(Value::Null));
        }

        let columns: Vec<String> = self
            .manifest
            .map(|m| m.schema.columns.into_iter().map(|c| c.name).collect())
            .unwrap_or_default();
        let objects = rows
            .into_iter()
            .map(|row| {
                let object: Map<String, Value> = columns.iter().cloned().zip(row).collect();
                Value::Object(object)
            })
            .collect();
        Ok(Value::Array(objects))
    }
}

// ============================================================================
// Tool: catalog function
// ============================================================================

/// A single catalog function exposed as a tool
pub struct FunctionTool {
    name: String,
    description: String,
    info: FunctionInfo,
    client: Arc<dyn FunctionClient>,
}

impl FunctionTool {
    pub fn new(info: FunctionInfo, client: Arc<dyn FunctionClient>) -> Self {
        Self {
            name: tool_name_for(&info.full_name),
            description: info
                .comment
                .clone()
                .unwrap_or_else(|| format!("Calls the {} function", info.full_name)),
            info,
            client,
        }
    }

    pub fn info(&self) -> &FunctionInfo {
        &self.info
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.info.parameters_schema()
    }

    async fn execute(&self, arguments: Value) -> ToolOutcome {
        let Value::Object(arguments) = arguments else {
            return ToolOutcome::rejected("arguments must be a JSON object");
        };

        match self.client.execute_function(&self.info, &arguments).await {
            Ok(value) => ToolOutcome::output(value),
            Err(err) => toolkit_error_result(err),
        }
    }
}

// ============================================================================
// FunctionToolkit
// ============================================================================

/// Tools for a list of catalog functions
pub struct FunctionToolkit {
    tools: Vec<Arc<dyn Tool>>,
}

impl FunctionToolkit {
    /// Resolve `names` into tools, preserving the given order.
    ///
    /// `catalog.schema.*` expands to every function of that schema.
    pub async fn resolve<S: AsRef<str>>(
        client: Arc<dyn FunctionClient>,
        names: &[S],
    ) -> Result<Self, ToolkitError> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();

        for name in names {
            let name = name.as_ref().trim();
            let infos = match name.strip_suffix(".*") {
                Some(prefix) => {
                    let (catalog, schema) = prefix.split_once('.').ok_or_else(|| {
                        ToolkitError::config(format!("Invalid function pattern: {name}"))
                    })?;
                    client.list_functions(catalog, schema).await?
                }
                None => {
                    if name.split('.').count() != 3 {
                        return Err(ToolkitError::config(format!(
                            "Function name must be catalog.schema.function, got {name}"
                        )));
                    }
                    vec![client.get_function(name).await?]
                }
            };

            for info in infos {
                tools.push(Arc::new(FunctionTool::new(info, Arc::clone(&client))));
            }
        }

        info!(count = tools.len(), "Resolved function tools");
        Ok(Self { tools })
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Toolkit for FunctionToolkit {
    fn name(&self) -> &str {
        "functions"
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use crate::traits::ToolExecutor;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lookup_info() -> Value {
        json!({
            "full_name": "main.tools.lookup_doc",
            "comment": "Look up a document by id",
            "data_type": "STRING",
            "input_params": {"parameters": [
                {"name": "limit", "type_name": "INT", "position": 1, "parameter_default": "10"},
                {"name": "doc_id", "type_name": "STRING", "position": 0, "comment": "Document id"}
            ]}
        })
    }

    fn client_for(server: &MockServer) -> Arc<dyn FunctionClient> {
        Arc::new(DatabricksFunctionClient::new(
            DatabricksWorkspace::new(server.uri(), "tok").unwrap(),
            "wh-1",
        ))
    }

    #[test]
    fn test_schema_from_parameters() {
        let info: FunctionInfo = serde_json::from_value(lookup_info()).unwrap();
        let schema = info.parameters_schema();

        assert_eq!(schema["properties"]["doc_id"]["type"], "string");
        assert_eq!(schema["properties"]["doc_id"]["description"], "Document id");
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
        assert_eq!(schema["required"], json!(["doc_id"]));
    }

    #[test]
    fn test_statement_uses_named_arguments() {
        let info: FunctionInfo = serde_json::from_value(lookup_info()).unwrap();
        let args = json!({"doc_id": "d-1", "limit": 3});
        let (statement, params) =
            DatabricksFunctionClient::statement_for(&info, args.as_object().unwrap());

        assert_eq!(
            statement,
            "SELECT main.tools.lookup_doc(doc_id => :doc_id, limit => :limit)"
        );
        assert_eq!(params[0], json!({"name": "doc_id", "value": "d-1", "type": "STRING"}));
        assert_eq!(params[1]["value"], "3");
    }

    #[tokio::test]
    async fn test_resolve_and_execute_scalar() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/2.1/unity-catalog/functions/main.tools.lookup_doc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(lookup_info()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/2.0/sql/statements"))
            .and(body_partial_json(json!({
                "warehouse_id": "wh-1",
                "format": "JSON_ARRAY",
                "disposition": "INLINE"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "statement_id": "s1",
                "status": {"state": "SUCCEEDED"},
                "manifest": {"schema": {"columns": [{"name": "result"}]}},
                "result": {"data_array": [["MLOps guide"]]}
            })))
            .mount(&server)
            .await;

        let toolkit = FunctionToolkit::resolve(client_for(&server), &["main.tools.lookup_doc"])
            .await
            .unwrap();
        let registry = ToolRegistry::builder().toolkit(&toolkit).build().unwrap();

        assert_eq!(registry.tool_names(), vec!["main__tools__lookup_doc"]);
        let value = registry
            .invoke("main__tools__lookup_doc", &json!({"doc_id": "d-1"}))
            .await
            .unwrap();
        assert_eq!(value, json!("MLOps guide"));
    }

    #[tokio::test]
    async fn test_table_function_returns_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/2.0/sql/statements"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"state": "SUCCEEDED"},
                "manifest": {"schema": {"columns": [{"name": "id"}, {"name": "title"}]}},
                "result": {"data_array": [["1", "Intro"], ["2", "Serving"]]}
            })))
            .mount(&server)
            .await;

        let info: FunctionInfo = serde_json::from_value(json!({
            "full_name": "main.tools.list_docs",
            "data_type": "TABLE_TYPE"
        }))
        .unwrap();
        let value = client_for(&server)
            .execute_function(&info, &Map::new())
            .await
            .unwrap();

        assert_eq!(
            value,
            json!([{"id": "1", "title": "Intro"}, {"id": "2", "title": "Serving"}])
        );
    }

    #[tokio::test]
    async fn test_failed_statement_is_tool_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/2.0/sql/statements"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": {"state": "FAILED", "error": {"message": "[DIVIDE_BY_ZERO] Division by zero"}}
            })))
            .mount(&server)
            .await;

        let info: FunctionInfo = serde_json::from_value(lookup_info()).unwrap();
        let tool = FunctionTool::new(info, client_for(&server));

        match tool.execute(json!({"doc_id": "x"})).await {
            ToolOutcome::Rejected(message) => assert!(message.contains("DIVIDE_BY_ZERO")),
            other => panic!("Expected tool error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_schema_wildcard() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/2.1/unity-catalog/functions"))
            .and(query_param("catalog_name", "main"))
            .and(query_param("schema_name", "tools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "functions": [lookup_info(), {"full_name": "main.tools.list_docs", "data_type": "TABLE_TYPE"}]
            })))
            .mount(&server)
            .await;

        let toolkit = FunctionToolkit::resolve(client_for(&server), &["main.tools.*"])
            .await
            .unwrap();
        let names: Vec<String> = toolkit
            .tool_definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["main__tools__lookup_doc", "main__tools__list_docs"]);
    }

    #[tokio::test]
    async fn test_resolve_rejects_unqualified_name() {
        let server = MockServer::start().await;
        let result = FunctionToolkit::resolve(client_for(&server), &["lookup_doc"]).await;
        assert!(matches!(result, Err(ToolkitError::Configuration(_))));
    }
}
