use std::fmt;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A usable compressed artifact: either the bytes themselves or a stable
/// reference to bytes that are already durable somewhere else.
#[derive(Clone, PartialEq, Eq)]
pub enum ArtifactRef {
    Inline {
        bytes: Vec<u8>,
        content_type: String,
    },
    External {
        url: String,
    },
}

impl ArtifactRef {
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}

impl fmt::Debug for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline {
                bytes,
                content_type,
            } => f
                .debug_struct("Inline")
                .field("len", &bytes.len())
                .field("content_type", content_type)
                .finish(),
            Self::External { url } => f.debug_struct("External").field("url", url).finish(),
        }
    }
}

/// Durable form of an artifact inside a history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StoredArtifact {
    /// `data:<type>;base64,<payload>`
    CompressedDataUrl(String),
    /// Server-relative or absolute URL of an artifact persisted by the proxy.
    ServerPath(String),
}

impl StoredArtifact {
    /// Convert an artifact into its durable form. Inline bytes are encoded
    /// as a data URL; external references are kept as-is.
    pub fn capture(artifact: &ArtifactRef) -> Result<Self, ArtifactEncodeError> {
        match artifact {
            ArtifactRef::Inline {
                bytes,
                content_type,
            } => {
                if bytes.is_empty() {
                    return Err(ArtifactEncodeError::EmptyPayload);
                }
                if content_type.is_empty() || content_type.contains([',', ';']) {
                    return Err(ArtifactEncodeError::InvalidContentType(
                        content_type.clone(),
                    ));
                }
                let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
                Ok(Self::CompressedDataUrl(format!(
                    "data:{content_type};base64,{payload}"
                )))
            }
            ArtifactRef::External { url } => Ok(Self::ServerPath(url.clone())),
        }
    }

    /// Recover the bytes of an inline artifact. External references return `None`.
    pub fn decode_inline(&self) -> Option<(String, Vec<u8>)> {
        let Self::CompressedDataUrl(data_url) = self else {
            return None;
        };
        let rest = data_url.strip_prefix("data:")?;
        let (content_type, payload) = rest.split_once(";base64,")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?;
        Some((content_type.to_string(), bytes))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactEncodeError {
    #[error("compressed artifact is empty")]
    EmptyPayload,

    #[error("invalid artifact content type: {0:?}")]
    InvalidContentType(String),
}

/// Durable record of one completed compression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub original_name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub compressed_at: DateTime<Utc>,
    #[serde(rename = "savings")]
    pub savings_percent: f64,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<StoredArtifact>,
}

/// Percentage of bytes saved. Zero when the original size is zero.
/// Negative when the compressed output is larger than the input.
pub fn savings_percent(original_size: u64, compressed_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    (original_size as f64 - compressed_size as f64) / original_size as f64 * 100.0
}
