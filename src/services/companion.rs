use std::time::Duration;

use reqwest::Client;

use crate::models::api::{ArtifactListing, ErrorBody, HealthResponse, KeyStatus};

/// Client for the proxy's non-compression endpoints.
pub struct CompanionClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CompanionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("companion server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid proxy URL {0}")]
    BaseUrl(String),
}

impl CompanionError {
    async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.best_message().map(str::to_string))
            .unwrap_or(text);
        Self::Status { status, message }
    }
}

impl CompanionClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CompanionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, CompanionError> {
        let response = self.http.get(format!("{}{}", self.base_url, path)).send().await?;
        if !response.status().is_success() {
            return Err(CompanionError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    /// Liveness check.
    pub async fn health(&self) -> Result<HealthResponse, CompanionError> {
        self.get_json("/health").await
    }

    /// Whether the server holds its own API key. Never returns the key.
    pub async fn key_status(&self) -> Result<KeyStatus, CompanionError> {
        self.get_json("/api/config/key-status").await
    }

    pub async fn list_artifacts(&self) -> Result<Vec<ArtifactListing>, CompanionError> {
        self.get_json("/api/artifacts").await
    }

    pub async fn delete_artifact(&self, name: &str) -> Result<(), CompanionError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| CompanionError::BaseUrl(format!("{}: {e}", self.base_url)))?;
        // Appended segment by segment so a path prefix on the proxy URL is
        // kept and the name is percent-encoded.
        url.path_segments_mut()
            .map_err(|_| CompanionError::BaseUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["api", "artifacts", name]);

        let response = self.http.delete(url).send().await?;
        if !response.status().is_success() {
            return Err(CompanionError::from_response(response).await);
        }
        Ok(())
    }
}
