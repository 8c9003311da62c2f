// Conversation loop settings
//
// AgentConfig carries no transport details; the server fills it from the
// environment and library users build it in code or from JSON, where
// timeouts are given in seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Guidance for the GenAI development assistant the server deploys by default
pub const DEFAULT_SYSTEM_PROMPT: &str = "あなたは生成AI開発に関する専門的なアシスタントです。
登録されたVector Search Indexを活用して、
ユーザーの質問に対して正確で有用な回答を提供してください。

以下のガイドラインに従ってください：
1. 利用可能なツールを効果的に活用してください
2. 検索された文書の内容に基づいて回答してください
3. 不確かな情報については推測を避けてください
4. 具体的で実用的なアドバイスを提供してください
5. 日本語で丁寧に回答してください

必要に応じて複数のツールを組み合わせて使用し、
ユーザーにとって最も有益な情報を提供してください。";

/// Default assistant message appended when the iteration bound is hit
pub const DEFAULT_TRUNCATION_NOTICE: &str =
    "I stopped before finishing because the tool-calling step limit was reached.";

/// Settings for one agent: prompt, endpoint, bounds and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System prompt prepended to every model invocation (never stored)
    #[serde(default)]
    pub system_prompt: String,

    /// Model identifier (serving endpoint name, e.g. "databricks-claude-sonnet-4")
    pub model: String,

    /// Upper bound on model calls per request
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Sampling temperature passed through to the endpoint
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Completion token cap per model call
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Timeout for a single model invocation
    #[serde(default, with = "option_duration_secs")]
    pub model_timeout: Option<Duration>,

    /// Timeout for a single tool invocation
    #[serde(default, with = "option_duration_secs")]
    pub tool_timeout: Option<Duration>,

    /// Execute the tool calls of one assistant message concurrently
    #[serde(default)]
    pub parallel_tool_calls: bool,

    /// Assistant text emitted when the loop is cut short by `max_iterations`
    #[serde(default = "default_truncation_notice")]
    pub truncation_notice: String,
}

fn default_max_iterations() -> usize {
    10
}

fn default_truncation_notice() -> String {
    DEFAULT_TRUNCATION_NOTICE.to_string()
}

impl AgentConfig {
    pub fn new(system_prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the per-call model timeout
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = Some(timeout);
        self
    }

    /// Set the per-call tool timeout
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Enable or disable concurrent tool execution
    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    /// Set the truncation notice
    pub fn with_truncation_notice(mut self, notice: impl Into<String>) -> Self {
        self.truncation_notice = notice.into();
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            model: "databricks-claude-sonnet-4".to_string(),
            max_iterations: default_max_iterations(),
            temperature: None,
            max_tokens: None,
            model_timeout: None,
            tool_timeout: None,
            parallel_tool_calls: false,
            truncation_notice: default_truncation_notice(),
        }
    }
}

/// Fluent construction of an [`AgentConfig`], starting from the defaults
#[derive(Debug, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_iterations(self, max: usize) -> Self {
        self.map(|c| c.with_max_iterations(max))
    }

    pub fn temperature(self, temperature: f32) -> Self {
        self.map(|c| c.with_temperature(temperature))
    }

    pub fn max_tokens(self, tokens: u32) -> Self {
        self.map(|c| c.with_max_tokens(tokens))
    }

    pub fn model_timeout(self, timeout: Duration) -> Self {
        self.map(|c| c.with_model_timeout(timeout))
    }

    pub fn tool_timeout(self, timeout: Duration) -> Self {
        self.map(|c| c.with_tool_timeout(timeout))
    }

    pub fn parallel_tool_calls(self, parallel: bool) -> Self {
        self.map(|c| c.with_parallel_tool_calls(parallel))
    }

    pub fn truncation_notice(self, notice: impl Into<String>) -> Self {
        self.map(|c| c.with_truncation_notice(notice))
    }

    pub fn build(self) -> AgentConfig {
        self.config
    }

    fn map(self, f: impl FnOnce(AgentConfig) -> AgentConfig) -> Self {
        Self {
            config: f(self.config),
        }
    }
}

mod option_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<f64> = Option::deserialize(deserializer)?;
        secs.map(|s| {
            Duration::try_from_secs_f64(s).map_err(|e| {
                serde::de::Error::custom(format!("invalid timeout of {s} seconds: {e}"))
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new("Be helpful", "my-endpoint");
        assert_eq!(config.system_prompt, "Be helpful");
        assert_eq!(config.model, "my-endpoint");
        assert_eq!(config.max_iterations, 10);
        assert!(!config.parallel_tool_calls);
        assert!(config.model_timeout.is_none());
        assert_eq!(config.truncation_notice, DEFAULT_TRUNCATION_NOTICE);
    }

    #[test]
    fn test_builder() {
        let config = AgentConfigBuilder::new()
            .system_prompt("sys")
            .model("m")
            .max_iterations(3)
            .tool_timeout(Duration::from_secs(5))
            .parallel_tool_calls(true)
            .build();

        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.tool_timeout, Some(Duration::from_secs(5)));
        assert!(config.parallel_tool_calls);
    }

    #[test]
    fn test_deserialize_with_timeouts_in_seconds() {
        let config: AgentConfig = serde_json::from_str(
            r#"{"model": "m", "model_timeout": 30, "tool_timeout": 2.5}"#,
        )
        .unwrap();

        assert_eq!(config.model_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.tool_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.max_iterations, 10);
        assert!(config.system_prompt.is_empty());
    }

    #[test]
    fn test_deserialize_rejects_negative_timeout() {
        let result: std::result::Result<AgentConfig, _> =
            serde_json::from_str(r#"{"model": "m", "model_timeout": -1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_rejects_out_of_range_timeout() {
        let result: std::result::Result<AgentConfig, _> =
            serde_json::from_str(r#"{"model": "m", "model_timeout": 1e30}"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid timeout"), "{err}");
    }
}
