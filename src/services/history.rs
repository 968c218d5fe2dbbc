//! Bounded, newest-first log of completed compressions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::history::{savings_percent, ArtifactRef, HistoryEntry, StoredArtifact};
use crate::models::job::{ImageJob, JobStatus};
use crate::services::kv::{KeyValueStore, StoreError};

pub const HISTORY_KEY: &str = "compression-history";
pub const MAX_HISTORY_ENTRIES: usize = 50;

/// Everything the store needs to know about one finished compression.
#[derive(Debug, Clone)]
pub struct CompletedRecord {
    pub id: Uuid,
    pub original_name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub artifact: Option<ArtifactRef>,
}

impl CompletedRecord {
    /// Only successful jobs produce a record.
    pub fn from_job(job: &ImageJob) -> Option<Self> {
        if job.status() != JobStatus::Success {
            return None;
        }
        let output = job.compressed()?;
        Some(Self {
            id: job.id(),
            original_name: job.original_name().to_string(),
            original_size: job.original_size(),
            compressed_size: output.size,
            artifact: Some(output.artifact.clone()),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("history storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to write {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where an exported history artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Inline bytes written to this file.
    Written(PathBuf),
    /// The artifact already lives on the proxy.
    ServerPath(String),
    /// The entry carries no recoverable artifact.
    Unavailable,
}

/// History persisted under a single key of a [`KeyValueStore`].
///
/// Every mutation is a full read-modify-write of the list, serialized by
/// `write_lock` so concurrent successes within a batch never lose updates.
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_capacity(store, MAX_HISTORY_ENTRIES)
    }

    pub fn with_capacity(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Insert a new entry at the head and evict from the tail past capacity.
    pub async fn append(&self, record: CompletedRecord) -> Result<HistoryEntry, HistoryError> {
        let artifact = match record.artifact.as_ref().map(StoredArtifact::capture) {
            Some(Ok(stored)) => Some(stored),
            Some(Err(e)) => {
                tracing::warn!(job_id = %record.id, error = %e, "Storing history entry without artifact");
                None
            }
            None => None,
        };

        let entry = HistoryEntry {
            id: record.id,
            original_name: record.original_name,
            original_size: record.original_size,
            compressed_size: record.compressed_size,
            compressed_at: Utc::now(),
            savings_percent: savings_percent(record.original_size, record.compressed_size),
            artifact,
        };

        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.insert(0, entry.clone());
        entries.truncate(self.capacity);
        let encoded = serde_json::to_string(&entries)?;
        self.blocking(move |store| store.set(HISTORY_KEY, &encoded))
            .await?;

        tracing::debug!(job_id = %entry.id, len = entries.len(), "History entry appended");
        Ok(entry)
    }

    /// The last committed history, newest first.
    pub async fn list(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let _guard = self.write_lock.lock().await;
        self.read_entries().await
    }

    pub async fn clear(&self) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().await;
        self.blocking(|store| store.remove(HISTORY_KEY)).await?;
        tracing::info!("History cleared");
        Ok(())
    }

    /// Run a store call on the blocking pool so file I/O never stalls
    /// sibling pipelines on the same runtime.
    async fn blocking<T, F>(&self, op: F) -> Result<T, HistoryError>
    where
        F: FnOnce(&dyn KeyValueStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || op(store.as_ref())).await??)
    }

    async fn read_entries(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let Some(raw) = self.blocking(|store| store.get(HISTORY_KEY)).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!(error = %e, "Stored history is unreadable, starting empty");
                Ok(Vec::new())
            }
        }
    }
}

/// Write an entry's compressed artifact to `out_dir` as `compressed-<name>`.
/// Entries persisted on the proxy are reported by path instead.
pub async fn export_entry(entry: &HistoryEntry, out_dir: &Path) -> Result<ExportOutcome, HistoryError> {
    let Some(artifact) = &entry.artifact else {
        return Ok(ExportOutcome::Unavailable);
    };
    if let StoredArtifact::ServerPath(path) = artifact {
        return Ok(ExportOutcome::ServerPath(path.clone()));
    }
    let Some((_, bytes)) = artifact.decode_inline() else {
        tracing::warn!(entry_id = %entry.id, "Stored artifact is not a valid data URL");
        return Ok(ExportOutcome::Unavailable);
    };

    // Only the final component, so a stored name can never escape out_dir.
    let file_name = Path::new(&entry.original_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.id.to_string());
    let target = out_dir.join(format!("compressed-{file_name}"));
    tokio::fs::write(&target, &bytes)
        .await
        .map_err(|source| HistoryError::Export {
            path: target.clone(),
            source,
        })?;
    Ok(ExportOutcome::Written(target))
}
