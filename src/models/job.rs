use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::history::ArtifactRef;

/// Lifecycle of one image within a compression run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Compressing,
    Success,
    Error,
}

impl JobStatus {
    /// Only idle and failed jobs may be picked up by the orchestrator.
    pub fn is_eligible(self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to} for job {job_id}")]
pub struct TransitionError {
    pub job_id: Uuid,
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("{0} is empty")]
    Empty(String),

    #[error("{0} is not a supported image (JPEG, PNG, WebP or GIF)")]
    NotAnImage(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a successful compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedOutput {
    pub size: u64,
    pub artifact: ArtifactRef,
}

/// One user-submitted image being processed.
///
/// Fields are private so every mutation goes through the transition
/// methods below; `compressed` is only set while `Success` and `error`
/// only while `Error`.
#[derive(Debug, Clone)]
pub struct ImageJob {
    id: Uuid,
    original_name: String,
    original_bytes: Arc<[u8]>,
    content_type: String,
    status: JobStatus,
    progress: u8,
    compressed: Option<CompressedOutput>,
    error: Option<String>,
}

impl ImageJob {
    /// Accept an image at intake. Empty or non-image data is rejected.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, IntakeError> {
        let name = name.into();
        if bytes.is_empty() {
            return Err(IntakeError::Empty(name));
        }
        let format = image::guess_format(&bytes).map_err(|_| IntakeError::NotAnImage(name.clone()))?;
        Ok(Self {
            id: Uuid::new_v4(),
            original_name: name,
            original_bytes: Arc::from(bytes),
            content_type: format.to_mime_type().to_string(),
            status: JobStatus::Idle,
            progress: 0,
            compressed: None,
            error: None,
        })
    }

    pub async fn from_path(path: &Path) -> Result<Self, IntakeError> {
        let display = path.display().to_string();
        let bytes = tokio::fs::read(path).await.map_err(|source| IntakeError::Read {
            path: display.clone(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(display);
        Self::from_bytes(name, bytes)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn original_bytes(&self) -> &[u8] {
        &self.original_bytes
    }

    pub fn original_size(&self) -> u64 {
        self.original_bytes.len() as u64
    }

    /// MIME type sniffed at intake.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn compressed(&self) -> Option<&CompressedOutput> {
        self.compressed.as_ref()
    }

    pub fn compressed_size(&self) -> Option<u64> {
        self.compressed.as_ref().map(|c| c.size)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_eligible(&self) -> bool {
        self.status.is_eligible()
    }

    fn illegal(&self, to: JobStatus) -> TransitionError {
        TransitionError {
            job_id: self.id,
            from: self.status,
            to,
        }
    }

    /// `idle | error -> compressing`. Resets progress and clears any prior error.
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        if !self.status.is_eligible() {
            return Err(self.illegal(JobStatus::Compressing));
        }
        self.status = JobStatus::Compressing;
        self.progress = 0;
        self.error = None;
        self.compressed = None;
        Ok(())
    }

    /// Record a pipeline milestone. Progress never moves backwards.
    /// Returns the effective progress after the update.
    pub fn advance(&mut self, progress: u8) -> Result<u8, TransitionError> {
        if self.status != JobStatus::Compressing {
            return Err(self.illegal(JobStatus::Compressing));
        }
        self.progress = self.progress.max(progress.min(100));
        Ok(self.progress)
    }

    /// `compressing -> success`. Requires both a size and a usable artifact.
    pub fn succeed(&mut self, size: u64, artifact: ArtifactRef) -> Result<(), TransitionError> {
        if self.status != JobStatus::Compressing {
            return Err(self.illegal(JobStatus::Success));
        }
        self.status = JobStatus::Success;
        self.progress = 100;
        self.compressed = Some(CompressedOutput { size, artifact });
        Ok(())
    }

    /// `compressing -> error`, storing the failure's message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Compressing {
            return Err(self.illegal(JobStatus::Error));
        }
        self.status = JobStatus::Error;
        self.error = Some(message.into());
        Ok(())
    }

    /// `error -> idle`, the first half of an explicit retry.
    pub fn reset(&mut self) -> Result<(), TransitionError> {
        if self.status != JobStatus::Error {
            return Err(self.illegal(JobStatus::Idle));
        }
        self.status = JobStatus::Idle;
        self.progress = 0;
        self.error = None;
        Ok(())
    }
}

/// What changed on a job. Emitted by the orchestrator in transition order.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Reset,
    Started,
    Progress(u8),
    Succeeded {
        compressed_size: u64,
        artifact: ArtifactRef,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub job_id: Uuid,
    pub event: JobEvent,
}

/// Read-only projection of a job, rebuilt from the update stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: Uuid,
    pub original_name: String,
    pub original_size: u64,
    pub status: JobStatus,
    pub progress: u8,
    pub compressed_size: Option<u64>,
    pub error: Option<String>,
}

impl JobView {
    pub fn of(job: &ImageJob) -> Self {
        Self {
            id: job.id(),
            original_name: job.original_name().to_string(),
            original_size: job.original_size(),
            status: job.status(),
            progress: job.progress(),
            compressed_size: job.compressed_size(),
            error: job.error().map(str::to_string),
        }
    }

    /// Fold one update into the projection. Updates for other jobs are ignored.
    pub fn apply(&mut self, update: &JobUpdate) {
        if update.job_id != self.id {
            return;
        }
        match &update.event {
            JobEvent::Reset => {
                self.status = JobStatus::Idle;
                self.progress = 0;
                self.error = None;
            }
            JobEvent::Started => {
                self.status = JobStatus::Compressing;
                self.progress = 0;
                self.error = None;
                self.compressed_size = None;
            }
            JobEvent::Progress(p) => self.progress = self.progress.max(*p),
            JobEvent::Succeeded {
                compressed_size, ..
            } => {
                self.status = JobStatus::Success;
                self.progress = 100;
                self.compressed_size = Some(*compressed_size);
            }
            JobEvent::Failed { message } => {
                self.status = JobStatus::Error;
                self.error = Some(message.clone());
            }
        }
    }
}
