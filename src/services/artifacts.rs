//! Server-side persistence of compressed artifacts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::api::ArtifactListing;

/// URL prefix under which persisted artifacts are served.
pub const ARTIFACT_URL_PREFIX: &str = "/artifacts";

/// Flat directory of artifact files.
pub struct ArtifactStore {
    dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactStoreError {
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid artifact name {0:?}")]
    InvalidName(String),

    #[error("artifact {0:?} not found")]
    NotFound(String),
}

impl ArtifactStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, ArtifactStoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write bytes under a unique name derived from `original_name`.
    /// Returns the stored file name.
    pub async fn save(
        &self,
        original_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<String, ArtifactStoreError> {
        let name = unique_name(original_name, content_type);
        tokio::fs::write(self.dir.join(&name), bytes).await?;
        tracing::info!(artifact = %name, size = bytes.len(), "Artifact persisted");
        Ok(name)
    }

    /// All persisted artifacts, newest first.
    pub async fn list(&self) -> Result<Vec<ArtifactListing>, ArtifactStoreError> {
        let mut listings = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let modified_at: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            listings.push(ArtifactListing {
                path: public_path(&name),
                name,
                size: metadata.len(),
                modified_at,
            });
        }
        listings.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then(a.name.cmp(&b.name)));
        Ok(listings)
    }

    pub async fn delete(&self, name: &str) -> Result<(), ArtifactStoreError> {
        validate_name(name)?;
        match tokio::fs::remove_file(self.dir.join(name)).await {
            Ok(()) => {
                tracing::info!(artifact = %name, "Artifact deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactStoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Server-relative URL of a stored artifact.
pub fn public_path(name: &str) -> String {
    format!("{ARTIFACT_URL_PREFIX}/{name}")
}

fn validate_name(name: &str) -> Result<(), ArtifactStoreError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains("..");
    if ok {
        Ok(())
    } else {
        Err(ArtifactStoreError::InvalidName(name.to_string()))
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/avif" => Some("avif"),
        _ => None,
    }
}

/// `<sanitized-stem>-<short-uuid>.<ext>`
fn unique_name(original_name: &str, content_type: &str) -> String {
    let path = Path::new(original_name);
    let stem: String = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    let stem = if stem.is_empty() { "image".to_string() } else { stem };
    let ext = extension_for(content_type)
        .map(str::to_string)
        .or_else(|| {
            path.extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        })
        .unwrap_or_else(|| "bin".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{stem}-{}.{ext}", &suffix[..8])
}
