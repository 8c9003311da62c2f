// Server settings
//
// Loaded from environment variables (a local .env file is honoured).
// Blank values count as unset. Malformed values fail at startup rather than
// falling back silently.

use std::net::SocketAddr;
use std::time::Duration;

use ragent_core::{AgentConfig, DEFAULT_SYSTEM_PROMPT};
use thiserror::Error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_ENDPOINT_NAME: &str = "databricks-claude-sonnet-4";
const DEFAULT_RETRIEVER_DESCRIPTION: &str = "生成AI開発に関する技術文書やベストプラクティスを検索するためのツールです。GenAI開発ワークフロー、MLOps、エージェント設計などについて質問がある場合に使用してください。";

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("{0} environment variable required")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Retriever tool settings
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchSettings {
    pub index_name: String,
    pub description: String,
    pub num_results: Option<usize>,
    pub columns: Vec<String>,
}

/// Catalog function tool settings
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSettings {
    pub names: Vec<String>,
    pub warehouse_id: String,
}

#[derive(Clone)]
pub struct ServerSettings {
    pub databricks_host: String,
    pub databricks_token: String,
    pub bind_address: SocketAddr,
    pub agent: AgentConfig,
    pub vector_search: Option<VectorSearchSettings>,
    pub functions: Option<FunctionSettings>,
}

impl ServerSettings {
    /// Create settings from environment variables
    ///
    /// Environment variables:
    /// - `DATABRICKS_HOST`, `DATABRICKS_TOKEN`: workspace connection (required)
    /// - `LLM_ENDPOINT_NAME`: serving endpoint (default: databricks-claude-sonnet-4)
    /// - `SYSTEM_PROMPT`: system prompt sent with every model call
    ///   (default: the GenAI development assistant guidance)
    /// - `VECTOR_SEARCH_INDEX`: enables the retriever tool
    /// - `VECTOR_SEARCH_TOOL_DESCRIPTION`, `VECTOR_SEARCH_NUM_RESULTS`,
    ///   `VECTOR_SEARCH_COLUMNS` (comma separated): retriever options
    /// - `UC_FUNCTION_NAMES` (comma separated): enables function tools,
    ///   requires `SQL_WAREHOUSE_ID`
    /// - `AGENT_MAX_ITERATIONS`, `MODEL_TIMEOUT_SECS`, `TOOL_TIMEOUT_SECS`,
    ///   `PARALLEL_TOOL_CALLS`: loop tuning
    /// - `BIND_ADDRESS`: listen address (default: 0.0.0.0:8080)
    pub fn from_env() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create settings from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let databricks_host = env
            .get("DATABRICKS_HOST")
            .ok_or(SettingsError::Missing("DATABRICKS_HOST"))?;
        let databricks_token = env
            .get("DATABRICKS_TOKEN")
            .ok_or(SettingsError::Missing("DATABRICKS_TOKEN"))?;

        let bind_address = env
            .parse("BIND_ADDRESS")?
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)));

        let mut agent = AgentConfig::new(
            env.get("SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            env.get("LLM_ENDPOINT_NAME")
                .unwrap_or_else(|| DEFAULT_ENDPOINT_NAME.to_string()),
        );
        if let Some(max) = env.parse::<usize>("AGENT_MAX_ITERATIONS")? {
            if max == 0 {
                return Err(env.invalid("AGENT_MAX_ITERATIONS", "must be at least 1"));
            }
            agent = agent.with_max_iterations(max);
        }
        if let Some(secs) = env.parse::<u64>("MODEL_TIMEOUT_SECS")? {
            agent = agent.with_model_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = env.parse::<u64>("TOOL_TIMEOUT_SECS")? {
            agent = agent.with_tool_timeout(Duration::from_secs(secs));
        }
        if let Some(parallel) = env.flag("PARALLEL_TOOL_CALLS")? {
            agent = agent.with_parallel_tool_calls(parallel);
        }

        let vector_search = match env.get("VECTOR_SEARCH_INDEX") {
            Some(index_name) => Some(VectorSearchSettings {
                index_name,
                description: env
                    .get("VECTOR_SEARCH_TOOL_DESCRIPTION")
                    .unwrap_or_else(|| DEFAULT_RETRIEVER_DESCRIPTION.to_string()),
                num_results: env.parse("VECTOR_SEARCH_NUM_RESULTS")?,
                columns: env.list("VECTOR_SEARCH_COLUMNS"),
            }),
            None => None,
        };

        let names = env.list("UC_FUNCTION_NAMES");
        let functions = if names.is_empty() {
            None
        } else {
            let warehouse_id = env
                .get("SQL_WAREHOUSE_ID")
                .ok_or(SettingsError::Missing("SQL_WAREHOUSE_ID"))?;
            Some(FunctionSettings {
                names,
                warehouse_id,
            })
        };

        Ok(Self {
            databricks_host,
            databricks_token,
            bind_address,
            agent,
            vector_search,
            functions,
        })
    }
}

impl std::fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSettings")
            .field("databricks_host", &self.databricks_host)
            .field("databricks_token", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("agent", &self.agent)
            .field("vector_search", &self.vector_search)
            .field("functions", &self.functions)
            .finish()
    }
}

/// Variable lookup with blank-as-unset semantics
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, SettingsError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| SettingsError::Invalid {
                    var: key,
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    fn flag(&self, key: &'static str) -> Result<Option<bool>, SettingsError> {
        match self.get(key).map(|v| v.to_lowercase()) {
            None => Ok(None),
            Some(v) if v == "true" || v == "1" => Ok(Some(true)),
            Some(v) if v == "false" || v == "0" => Ok(Some(false)),
            Some(_) => Err(self.invalid(key, "expected true/false")),
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn invalid(&self, key: &'static str, reason: &str) -> SettingsError {
        SettingsError::Invalid {
            var: key,
            value: self.get(key).unwrap_or_default(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<ServerSettings, SettingsError> {
        let mut env: HashMap<String, String> = HashMap::from([
            ("DATABRICKS_HOST".to_string(), "https://example.cloud.databricks.com".to_string()),
            ("DATABRICKS_TOKEN".to_string(), "dapi-test".to_string()),
        ]);
        for (k, v) in vars {
            env.insert(k.to_string(), v.to_string());
        }
        ServerSettings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.bind_address.to_string(), "0.0.0.0:8080");
        assert_eq!(s.agent.model, DEFAULT_ENDPOINT_NAME);
        assert_eq!(s.agent.max_iterations, 10);
        assert_eq!(s.agent.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(s.vector_search.is_none());
        assert!(s.functions.is_none());
    }

    #[test]
    fn test_missing_host() {
        let err = ServerSettings::from_lookup(|_| None).unwrap_err();
        assert_eq!(err, SettingsError::Missing("DATABRICKS_HOST"));
    }

    #[test]
    fn test_blank_values_are_unset() {
        let s = settings(&[("LLM_ENDPOINT_NAME", "  "), ("VECTOR_SEARCH_INDEX", "")]).unwrap();
        assert_eq!(s.agent.model, DEFAULT_ENDPOINT_NAME);
        assert!(s.vector_search.is_none());
    }

    #[test]
    fn test_loop_tuning() {
        let s = settings(&[
            ("AGENT_MAX_ITERATIONS", "4"),
            ("MODEL_TIMEOUT_SECS", "30"),
            ("TOOL_TIMEOUT_SECS", "5"),
            ("PARALLEL_TOOL_CALLS", "true"),
            ("SYSTEM_PROMPT", "You are a GenAI development assistant."),
        ])
        .unwrap();

        assert_eq!(s.agent.max_iterations, 4);
        assert_eq!(s.agent.model_timeout, Some(Duration::from_secs(30)));
        assert_eq!(s.agent.tool_timeout, Some(Duration::from_secs(5)));
        assert!(s.agent.parallel_tool_calls);
        assert_eq!(s.agent.system_prompt, "You are a GenAI development assistant.");
    }

    #[test]
    fn test_invalid_numbers_are_errors() {
        let err = settings(&[("MODEL_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { var: "MODEL_TIMEOUT_SECS", .. }));

        let err = settings(&[("AGENT_MAX_ITERATIONS", "0")]).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { var: "AGENT_MAX_ITERATIONS", .. }));

        let err = settings(&[("BIND_ADDRESS", "localhost")]).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { var: "BIND_ADDRESS", .. }));
    }

    #[test]
    fn test_vector_search() {
        let s = settings(&[
            ("VECTOR_SEARCH_INDEX", "main.docs.chunks_index"),
            ("VECTOR_SEARCH_NUM_RESULTS", "3"),
            ("VECTOR_SEARCH_COLUMNS", "content, url"),
        ])
        .unwrap();

        assert_eq!(
            s.vector_search,
            Some(VectorSearchSettings {
                index_name: "main.docs.chunks_index".into(),
                description: DEFAULT_RETRIEVER_DESCRIPTION.into(),
                num_results: Some(3),
                columns: vec!["content".into(), "url".into()],
            })
        );
    }

    #[test]
    fn test_retriever_description_override() {
        let s = settings(&[
            ("VECTOR_SEARCH_INDEX", "main.docs.chunks_index"),
            ("VECTOR_SEARCH_TOOL_DESCRIPTION", "Search the product manuals"),
        ])
        .unwrap();
        assert_eq!(
            s.vector_search.unwrap().description,
            "Search the product manuals"
        );
    }

    #[test]
    fn test_functions_require_warehouse() {
        let err = settings(&[("UC_FUNCTION_NAMES", "main.tools.lookup")]).unwrap_err();
        assert_eq!(err, SettingsError::Missing("SQL_WAREHOUSE_ID"));

        let s = settings(&[
            ("UC_FUNCTION_NAMES", "main.tools.lookup, main.tools.*"),
            ("SQL_WAREHOUSE_ID", "wh-1"),
        ])
        .unwrap();
        let functions = s.functions.unwrap();
        assert_eq!(functions.names, vec!["main.tools.lookup", "main.tools.*"]);
        assert_eq!(functions.warehouse_id, "wh-1");
    }

    #[test]
    fn test_debug_redacts_token() {
        let s = settings(&[]).unwrap();
        assert!(!format!("{s:?}").contains("dapi-test"));
    }
}
