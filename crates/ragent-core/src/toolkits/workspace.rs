// Databricks workspace REST client
//
// Thin JSON-over-HTTPS helper shared by the toolkits. Authentication is a
// bearer token (personal access token or service principal token).

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::ToolkitError;

/// Connection to one Databricks workspace
#[derive(Clone)]
pub struct DatabricksWorkspace {
    host: Url,
    token: String,
    client: Client,
}

impl DatabricksWorkspace {
    /// Create a workspace client; `host` must be an absolute http(s) URL
    pub fn new(host: impl AsRef<str>, token: impl Into<String>) -> Result<Self, ToolkitError> {
        let host = Url::parse(host.as_ref())
            .map_err(|e| ToolkitError::config(format!("Invalid workspace host: {e}")))?;
        if !matches!(host.scheme(), "http" | "https") {
            return Err(ToolkitError::config(format!(
                "Workspace host must be http(s), got {}",
                host.scheme()
            )));
        }
        Ok(Self {
            host,
            token: token.into(),
            client: Client::new(),
        })
    }

    /// Workspace host URL
    pub fn host(&self) -> &str {
        self.host.as_str().trim_end_matches('/')
    }

    /// Absolute URL for an API path
    pub fn endpoint(&self, path: &str) -> Result<Url, ToolkitError> {
        self.host
            .join(path)
            .map_err(|e| ToolkitError::config(format!("Invalid API path {path}: {e}")))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ToolkitError> {
        let url = self.endpoint(path)?;
        let request = self.client.get(url).query(query);
        self.send(path, request).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ToolkitError> {
        let url = self.endpoint(path)?;
        let request = self.client.post(url).json(body);
        self.send(path, request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<T, ToolkitError> {
        debug!(path = %path, "Workspace API request");

        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolkitError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ToolkitError::protocol(format!("{path}: {e}")))
    }
}

impl std::fmt::Debug for DatabricksWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabricksWorkspace")
            .field("host", &self.host.as_str())
            .field("token", &"[REDACTED]")
            .finish()
    }
}
