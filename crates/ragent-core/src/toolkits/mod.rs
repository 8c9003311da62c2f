//! Toolkits - producers of tools backed by external services
//!
//! A toolkit resolves a group of tools once, at startup, and hands them to
//! the ToolRegistry. Two toolkits are provided:
//! - `vector_search`: a retriever tool over a vector search index
//! - `functions`: catalog functions exposed as tools
//!
//! Both talk to a Databricks workspace through `workspace::DatabricksWorkspace`.

use std::sync::Arc;

use crate::error::ToolkitError;
use crate::tool_types::ToolDefinition;
use crate::tools::{Tool, ToolOutcome};

pub mod functions;
pub mod vector_search;
pub mod workspace;

pub use functions::{
    DatabricksFunctionClient, FunctionClient, FunctionInfo, FunctionParameterInfo, FunctionTool,
    FunctionToolkit,
};
pub use vector_search::{
    DatabricksVectorSearchClient, RetrievedDocument, VectorSearchClient,
    VectorSearchRetrieverTool,
};
pub use workspace::DatabricksWorkspace;

/// A named group of tools
pub trait Toolkit: Send + Sync {
    /// Display name of the toolkit
    fn name(&self) -> &str;

    /// Tools in the order they should be registered
    fn tools(&self) -> Vec<Arc<dyn Tool>>;

    /// Returns tool definitions for the model
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools().iter().map(|t| t.to_definition()).collect()
    }
}

/// Tool name for a dotted catalog name (`a.b.c` -> `a__b__c`).
///
/// Model endpoints only accept `[a-zA-Z0-9_-]` in function names.
pub fn tool_name_for(full_name: &str) -> String {
    full_name.replace('.', "__")
}

/// Map a collaborator failure to a tool result.
///
/// Remote failures and client errors describe the request and are shown to
/// the model; transport and protocol failures are internal.
pub(crate) fn toolkit_error_result(err: ToolkitError) -> ToolOutcome {
    match err {
        ToolkitError::Remote(message) => ToolOutcome::rejected(message),
        ToolkitError::Status { status, body, .. } if (400..500).contains(&status) => {
            ToolOutcome::rejected(format!("Request rejected ({status}): {body}"))
        }
        other => ToolOutcome::internal(other),
    }
}
