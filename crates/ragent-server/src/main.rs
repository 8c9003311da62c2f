// ragent serving harness
// Decision: One process serves one agent; tools are resolved once at startup
// Decision: The model is reached through the workspace's OpenAI-compatible serving endpoints

mod routes;
mod settings;

use std::sync::Arc;

use anyhow::{Context, Result};
use ragent_core::toolkits::{
    DatabricksFunctionClient, DatabricksVectorSearchClient, DatabricksWorkspace, FunctionToolkit,
    VectorSearchRetrieverTool,
};
use ragent_core::{BoxedLlmDriver, ChatAgent, OpenAILlmDriver, ToolRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::routes::AppState;
use crate::settings::ServerSettings;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragent_server=debug,ragent_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ragent-server starting...");

    let settings = ServerSettings::from_env().context("Invalid server configuration")?;
    tracing::info!(
        model = %settings.agent.model,
        max_iterations = settings.agent.max_iterations,
        parallel_tool_calls = settings.agent.parallel_tool_calls,
        "Agent configured"
    );

    let registry = build_registry(&settings).await?;
    tracing::info!(tools = ?registry.tool_names(), "Tool registry ready");

    let driver: BoxedLlmDriver = Box::new(OpenAILlmDriver::for_databricks(
        &settings.databricks_host,
        settings.databricks_token.clone(),
    ));
    let agent = ChatAgent::from_parts(settings.agent.clone(), driver, registry);
    let app = routes::router(AppState::new(agent));

    let listener = tokio::net::TcpListener::bind(settings.bind_address)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", settings.bind_address);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Resolve the configured tools, retriever first, then catalog functions
async fn build_registry(settings: &ServerSettings) -> Result<ToolRegistry> {
    let workspace = DatabricksWorkspace::new(&settings.databricks_host, &settings.databricks_token)
        .context("Invalid DATABRICKS_HOST")?;
    let mut registry = ToolRegistry::new();

    if let Some(vs) = &settings.vector_search {
        let client = Arc::new(DatabricksVectorSearchClient::new(workspace.clone()));
        let mut retriever = VectorSearchRetrieverTool::new(&vs.index_name, client)
            .with_description(&vs.description);
        if let Some(num_results) = vs.num_results {
            retriever = retriever.with_num_results(num_results);
        }
        if !vs.columns.is_empty() {
            retriever = retriever.with_columns(vs.columns.clone());
        }
        registry
            .register(retriever)
            .context("Failed to register retriever tool")?;
    }

    if let Some(functions) = &settings.functions {
        let client = Arc::new(DatabricksFunctionClient::new(
            workspace,
            &functions.warehouse_id,
        ));
        let toolkit = FunctionToolkit::resolve(client, functions.names.as_slice())
            .await
            .context("Failed to resolve catalog functions")?;
        registry
            .register_toolkit(&toolkit)
            .context("Failed to register function tools")?;
    }

    if registry.is_empty() {
        tracing::warn!("No tools configured; the agent will answer from the model alone");
    }

    Ok(registry)
}
