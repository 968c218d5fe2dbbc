use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::credential::Provenance;

/// Image metadata as reported by the compression service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageInfo {
    pub size: u64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Body returned by the upstream `POST /shrink`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamShrinkBody {
    #[serde(default)]
    pub input: Option<ImageInfo>,
    pub output: ImageInfo,
}

/// Body returned by the proxy's shrink endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShrinkResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ImageInfo>,
    pub output: Option<ImageInfo>,
    pub location: Option<String>,
}

/// `POST /api/tinypng/shrink/url`
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShrinkUrlRequest {
    #[garde(length(min = 1, max = 2048))]
    pub image_url: String,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Query of `GET /api/tinypng/output`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputQuery {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// `POST /api/tinypng/persist`
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PersistRequest {
    #[garde(length(min = 1, max = 2048))]
    pub url: String,

    #[garde(length(min = 1, max = 255))]
    pub name: String,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistResponse {
    pub path: String,
    pub size: u64,
    pub content_type: String,
}

/// One artifact persisted by the proxy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactListing {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// `GET /api/config/key-status`. Never carries the secret itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyStatus {
    pub configured: bool,
    pub source: Option<Provenance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub artifact_persistence: bool,
}

/// Error body rendered by the proxy and by the upstream service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Best human-readable message: `error` first, then `message`.
    pub fn best_message(&self) -> Option<&str> {
        self.error
            .as_deref()
            .filter(|m| !m.is_empty())
            .or(self.message.as_deref().filter(|m| !m.is_empty()))
    }
}
