//! Vector search retriever tool
//!
//! Wraps a vector search index as a tool the model can call with a natural
//! language query. Results are returned as a JSON array of documents, each
//! with `page_content` and `metadata`.
//!
//! Design decisions:
//! - The index is reached through the `VectorSearchClient` trait so tests and
//!   other backends can stand in for the Databricks API
//! - The first requested column is the document text; when no columns are
//!   configured they are read from the index description
//! - Similarity scores are reported in metadata under `score`

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{tool_name_for, toolkit_error_result, DatabricksWorkspace};
use crate::error::ToolkitError;
use crate::tools::{Tool, ToolOutcome};

/// Default number of documents returned per query
pub const DEFAULT_NUM_RESULTS: usize = 5;

/// A document returned by the retriever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Backend for similarity queries
#[async_trait]
pub trait VectorSearchClient: Send + Sync {
    /// Return up to `num_results` documents of `index_name` closest to `query`
    async fn similarity_search(
        &self,
        index_name: &str,
        query: &str,
        num_results: usize,
        columns: &[String],
    ) -> Result<Vec<RetrievedDocument>, ToolkitError>;
}

// ============================================================================
// Databricks backend
// ============================================================================

/// Vector search client for Databricks Mosaic AI Vector Search
#[derive(Debug, Clone)]
pub struct DatabricksVectorSearchClient {
    workspace: DatabricksWorkspace,
}

impl DatabricksVectorSearchClient {
    pub fn new(workspace: DatabricksWorkspace) -> Self {
        Self { workspace }
    }

    /// Columns to fetch when none were configured: primary key and text column
    async fn default_columns(&self, index_name: &str) -> Result<Vec<String>, ToolkitError> {
        let path = format!("/api/2.0/vector-search/indexes/{index_name}");
        let index: IndexDescription = self.workspace.get_json(&path, &[]).await?;

        let text_column = index
            .delta_sync_index_spec
            .as_ref()
            .or(index.direct_access_index_spec.as_ref())
            .and_then(|spec| spec.embedding_source_columns.first())
            .map(|c| c.name.clone())
            .ok_or_else(|| {
                ToolkitError::config(format!(
                    "Index {index_name} has no embedding source column; configure columns explicitly"
                ))
            })?;

        let mut columns = vec![text_column];
        if let Some(pk) = index.primary_key {
            if pk != columns[0] {
                columns.push(pk);
            }
        }
        Ok(columns)
    }
}

#[async_trait]
impl VectorSearchClient for DatabricksVectorSearchClient {
    async fn similarity_search(
        &self,
        index_name: &str,
        query: &str,
        num_results: usize,
        columns: &[String],
    ) -> Result<Vec<RetrievedDocument>, ToolkitError> {
        let columns = if columns.is_empty() {
            self.default_columns(index_name).await?
        } else {
            columns.to_vec()
        };

        let path = format!("/api/2.0/vector-search/indexes/{index_name}/query");
        let body = json!({
            "query_text": query,
            "columns": columns,
            "num_results": num_results,
        });
        let response: QueryResponse = self.workspace.post_json(&path, &body).await?;

        let documents = response.into_documents(&columns[0])?;
        debug!(index = %index_name, count = documents.len(), "Vector search completed");
        Ok(documents)
    }
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    #[serde(default)]
    primary_key: Option<String>,
    #[serde(default)]
    delta_sync_index_spec: Option<IndexSpec>,
    #[serde(default)]
    direct_access_index_spec: Option<IndexSpec>,
}

#[derive(Debug, Deserialize)]
struct IndexSpec {
    #[serde(default)]
    embedding_source_columns: Vec<NamedColumn>,
}

#[derive(Debug, Deserialize)]
struct NamedColumn {
    name: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    manifest: QueryManifest,
    #[serde(default)]
    result: Option<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryManifest {
    #[serde(default)]
    columns: Vec<NamedColumn>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    data_array: Vec<Vec<Value>>,
}

impl QueryResponse {
    fn into_documents(self, text_column: &str) -> Result<Vec<RetrievedDocument>, ToolkitError> {
        let names: Vec<String> = self.manifest.columns.into_iter().map(|c| c.name).collect();
        let text_index = names
            .iter()
            .position(|n| n == text_column)
            .ok_or_else(|| {
                ToolkitError::protocol(format!("text column {text_column} missing from results"))
            })?;

        let rows = self.result.map(|r| r.data_array).unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut page_content = String::new();
                let mut metadata = Map::new();
                for (i, value) in row.into_iter().enumerate() {
                    if i == text_index {
                        page_content = match value {
                            Value::String(s) => s,
                            Value::Null => String::new(),
                            other => other.to_string(),
                        };
                    } else if let Some(name) = names.get(i) {
                        metadata.insert(name.clone(), value);
                    }
                }
                RetrievedDocument {
                    page_content,
                    metadata,
                }
            })
            .collect())
    }
}

// ============================================================================
// Tool: vector search retriever
// ============================================================================

/// Retriever tool over one vector search index
pub struct VectorSearchRetrieverTool {
    name: String,
    index_name: String,
    description: String,
    num_results: usize,
    columns: Vec<String>,
    client: Arc<dyn VectorSearchClient>,
}

impl VectorSearchRetrieverTool {
    /// Create a retriever for `index_name` (a three-level `catalog.schema.index` name)
    pub fn new(index_name: impl Into<String>, client: Arc<dyn VectorSearchClient>) -> Self {
        let index_name = index_name.into();
        Self {
            name: tool_name_for(&index_name),
            description: format!(
                "Search the {index_name} vector search index for documents relevant to a query."
            ),
            index_name,
            num_results: DEFAULT_NUM_RESULTS,
            columns: Vec::new(),
            client,
        }
    }

    /// Set the description the model uses to decide when to search
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Override the derived tool name
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_num_results(mut self, num_results: usize) -> Self {
        self.num_results = num_results;
        self
    }

    /// Columns to return; the first one is the document text
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }
}

#[async_trait]
impl Tool for VectorSearchRetrieverTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The string used to query the index for the most relevant documents"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolOutcome {
        let query = match arguments.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q,
            _ => return ToolOutcome::rejected("query must be a non-empty string"),
        };

        match self
            .client
            .similarity_search(&self.index_name, query, self.num_results, &self.columns)
            .await
        {
            Ok(documents) => match serde_json::to_value(documents) {
                Ok(value) => ToolOutcome::output(value),
                Err(e) => ToolOutcome::internal(e),
            },
            Err(err) => toolkit_error_result(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct FakeIndex {
        queries: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl VectorSearchClient for FakeIndex {
        async fn similarity_search(
            &self,
            index_name: &str,
            query: &str,
            num_results: usize,
            _columns: &[String],
        ) -> Result<Vec<RetrievedDocument>, ToolkitError> {
            self.queries
                .lock()
                .await
                .push((index_name.to_string(), query.to_string(), num_results));
            if query == "nothing" {
                return Ok(Vec::new());
            }
            Ok(vec![RetrievedDocument {
                page_content: "MLOps is a set of practices...".into(),
                metadata: Map::from_iter([("score".to_string(), json!(0.91))]),
            }])
        }
    }

    #[test]
    fn test_tool_definition() {
        let tool = VectorSearchRetrieverTool::new("main.rag.docs_index", Arc::new(FakeIndex::default()))
            .with_description("Search GenAI docs");
        let def = tool.to_definition();

        assert_eq!(def.name, "main__rag__docs_index");
        assert_eq!(def.description, "Search GenAI docs");
        assert_eq!(def.required_parameters(), vec!["query"]);
    }

    #[tokio::test]
    async fn test_execute_returns_documents() {
        let index = Arc::new(FakeIndex::default());
        let tool = VectorSearchRetrieverTool::new("main.rag.docs_index", index.clone())
            .with_num_results(3);

        match tool.execute(json!({"query": "MLOps"})).await {
            ToolOutcome::Output(value) => {
                assert_eq!(value[0]["page_content"], "MLOps is a set of practices...");
                assert_eq!(value[0]["metadata"]["score"], 0.91);
            }
            other => panic!("Expected success, got {other:?}"),
        }

        let queries = index.queries.lock().await;
        assert_eq!(
            queries[0],
            ("main.rag.docs_index".to_string(), "MLOps".to_string(), 3)
        );
    }

    #[tokio::test]
    async fn test_empty_result_is_empty_array() {
        let tool = VectorSearchRetrieverTool::new("i", Arc::new(FakeIndex::default()));
        match tool.execute(json!({"query": "nothing"})).await {
            ToolOutcome::Output(value) => assert_eq!(value, json!([])),
            other => panic!("Expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blank_query_is_tool_error() {
        let tool = VectorSearchRetrieverTool::new("i", Arc::new(FakeIndex::default()));
        assert!(matches!(
            tool.execute(json!({"query": "  "})).await,
            ToolOutcome::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_databricks_query_maps_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/2.0/vector-search/indexes/main.rag.docs_index/query"))
            .and(body_json(json!({
                "query_text": "MLOps",
                "columns": ["chunk", "id", "url"],
                "num_results": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "manifest": {"column_count": 4, "columns": [
                    {"name": "chunk"}, {"name": "id"}, {"name": "url"}, {"name": "score"}
                ]},
                "result": {"row_count": 2, "data_array": [
                    ["MLOps is...", 1, "https://a", 0.9],
                    ["Model serving...", 2, "https://b", 0.7]
                ]}
            })))
            .mount(&server)
            .await;

        let client = DatabricksVectorSearchClient::new(
            DatabricksWorkspace::new(server.uri(), "tok").unwrap(),
        );
        let docs = client
            .similarity_search(
                "main.rag.docs_index",
                "MLOps",
                2,
                &["chunk".to_string(), "id".to_string(), "url".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].page_content, "MLOps is...");
        assert_eq!(docs[0].metadata["id"], 1);
        assert_eq!(docs[0].metadata["score"], 0.9);
        assert_eq!(docs[1].metadata["url"], "https://b");
    }

    #[tokio::test]
    async fn test_databricks_columns_from_index_description() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/2.0/vector-search/indexes/main.rag.docs_index"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "main.rag.docs_index",
                "primary_key": "id",
                "delta_sync_index_spec": {
                    "embedding_source_columns": [{"name": "chunk", "embedding_model_endpoint_name": "e5"}]
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/2.0/vector-search/indexes/main.rag.docs_index/query"))
            .and(body_json(json!({
                "query_text": "q",
                "columns": ["chunk", "id"],
                "num_results": 5
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "manifest": {"columns": [{"name": "chunk"}, {"name": "id"}, {"name": "score"}]},
                "result": {"data_array": []}
            })))
            .mount(&server)
            .await;

        let client = DatabricksVectorSearchClient::new(
            DatabricksWorkspace::new(server.uri(), "tok").unwrap(),
        );
        let docs = client
            .similarity_search("main.rag.docs_index", "q", DEFAULT_NUM_RESULTS, &[])
            .await
            .unwrap();
        assert!(docs.is_empty());
    }
}
