//! Client for the upstream Tinify (TinyPNG) API, used by the proxy server.

use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::{Client, StatusCode, Url};

use crate::models::api::{ImageInfo, UpstreamShrinkBody};
use crate::services::compression::basic_auth_value;

pub struct TinifyClient {
    http: Client,
    base_url: Url,
}

/// Result of a successful upstream `POST /shrink`.
#[derive(Debug, Clone)]
pub struct ShrinkOutcome {
    pub input: Option<ImageInfo>,
    pub output: ImageInfo,
    pub location: Option<String>,
}

/// Compressed bytes downloaded from an output location.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TinifyError {
    #[error("HTTP request to the compression service failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success upstream response, kept verbatim for forwarding.
    #[error("compression service returned HTTP {status}")]
    Upstream { status: StatusCode, body: Vec<u8> },

    #[error("invalid upstream base URL: {0}")]
    BaseUrl(String),

    #[error("output URL {0:?} does not belong to the compression service")]
    ForeignOutputUrl(String),
}

impl TinifyClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TinifyError> {
        let base_url = Url::parse(base_url).map_err(|e| TinifyError::BaseUrl(e.to_string()))?;
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tiny-squeeze/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, base_url })
    }

    fn shrink_url(&self) -> Result<Url, TinifyError> {
        self.base_url
            .join("/shrink")
            .map_err(|e| TinifyError::BaseUrl(e.to_string()))
    }

    /// Upload raw image bytes.
    pub async fn shrink_bytes(&self, bytes: Vec<u8>, api_key: &str) -> Result<ShrinkOutcome, TinifyError> {
        let request = self
            .http
            .post(self.shrink_url()?)
            .header(AUTHORIZATION, basic_auth_value(api_key))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        self.shrink(request).await
    }

    /// Ask the service to fetch and compress an image by URL.
    pub async fn shrink_remote(&self, image_url: &str, api_key: &str) -> Result<ShrinkOutcome, TinifyError> {
        let request = self
            .http
            .post(self.shrink_url()?)
            .header(AUTHORIZATION, basic_auth_value(api_key))
            .json(&serde_json::json!({ "source": { "url": image_url } }));
        self.shrink(request).await
    }

    async fn shrink(&self, request: reqwest::RequestBuilder) -> Result<ShrinkOutcome, TinifyError> {
        let start = Instant::now();
        let response = request.send().await?;
        metrics::histogram!("upstream_request_seconds", "call" => "shrink")
            .record(start.elapsed().as_secs_f64());

        let response = ensure_success(response).await?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: UpstreamShrinkBody = response.json().await?;

        Ok(ShrinkOutcome {
            input: body.input,
            output: body.output,
            location,
        })
    }

    /// Whether `url` points at the configured upstream (same scheme, host, port).
    pub fn is_own_output(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| u.origin() == self.base_url.origin())
            .unwrap_or(false)
    }

    /// Download a compressed artifact. Refuses URLs outside the upstream.
    pub async fn download(&self, url: &str, api_key: &str) -> Result<Download, TinifyError> {
        if !self.is_own_output(url) {
            return Err(TinifyError::ForeignOutputUrl(url.to_string()));
        }
        let start = Instant::now();
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, basic_auth_value(api_key))
            .send()
            .await?;
        metrics::histogram!("upstream_request_seconds", "call" => "output")
            .record(start.elapsed().as_secs_f64());

        let response = ensure_success(response).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok(Download {
            bytes,
            content_type,
        })
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TinifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
    Err(TinifyError::Upstream { status, body })
}
