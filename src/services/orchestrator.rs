//! Batch Orchestrator: drives independent per-image pipelines concurrently.
//!
//! All pipelines of a batch run interleaved on the caller's task
//! (`join_all`), suspending at network boundaries. Each job is borrowed
//! mutably by exactly one pipeline, so jobs never share mutable state; the
//! history store serializes its own writes.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::models::credential::Credential;
use crate::models::history::ArtifactRef;
use crate::models::job::{ImageJob, JobEvent, JobStatus, JobUpdate, TransitionError};
use crate::services::compression::{CompressionBackend, CompressionError, ImageSource};
use crate::services::history::{CompletedRecord, HistoryStore};

/// Progress checkpoints reported along the pipeline.
pub const PROGRESS_SUBMITTING: u8 = 25;
pub const PROGRESS_POINTER_RECEIVED: u8 = 50;
pub const PROGRESS_ARTIFACT_FETCHED: u8 = 75;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs that were not eligible (already compressing or successful).
    pub skipped: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("job {0} appears more than once in the batch")]
    DuplicateJob(Uuid),
}

pub struct BatchOrchestrator {
    backend: Arc<dyn CompressionBackend>,
    history: Arc<HistoryStore>,
    updates: Option<UnboundedSender<JobUpdate>>,
}

impl BatchOrchestrator {
    pub fn new(backend: Arc<dyn CompressionBackend>, history: Arc<HistoryStore>) -> Self {
        Self {
            backend,
            history,
            updates: None,
        }
    }

    /// Publish every `(job_id, event)` update on `tx`.
    pub fn with_updates(mut self, tx: UnboundedSender<JobUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Run every eligible job to a terminal state. Individual job failures
    /// are recorded on the job; only a malformed batch is an error.
    pub async fn process(
        &self,
        jobs: &mut [ImageJob],
        credential: &Credential,
    ) -> Result<BatchReport, BatchError> {
        let mut seen = HashSet::with_capacity(jobs.len());
        for job in jobs.iter() {
            if !seen.insert(job.id()) {
                return Err(BatchError::DuplicateJob(job.id()));
            }
        }

        let mut report = BatchReport::default();
        let mut pipelines = Vec::new();
        for job in jobs.iter_mut() {
            if job.is_eligible() {
                pipelines.push(self.run_job(job, credential));
            } else {
                tracing::debug!(job_id = %job.id(), status = %job.status(), "Skipping ineligible job");
                report.skipped += 1;
            }
        }
        report.dispatched = pipelines.len();

        tracing::info!(
            dispatched = report.dispatched,
            skipped = report.skipped,
            provenance = %credential.provenance(),
            "Processing batch"
        );

        for status in join_all(pipelines).await {
            match status {
                JobStatus::Success => report.succeeded += 1,
                JobStatus::Error => report.failed += 1,
                _ => {}
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Batch complete"
        );
        Ok(report)
    }

    /// Explicit retry of one failed job: reset to idle, then run the same pipeline.
    pub async fn retry(
        &self,
        job: &mut ImageJob,
        credential: &Credential,
    ) -> Result<JobStatus, TransitionError> {
        job.reset()?;
        self.emit(job.id(), JobEvent::Reset);
        tracing::info!(job_id = %job.id(), "Retrying job");
        Ok(self.run_job(job, credential).await)
    }

    async fn run_job(&self, job: &mut ImageJob, credential: &Credential) -> JobStatus {
        if let Err(e) = job.begin() {
            tracing::warn!(job_id = %job.id(), error = %e, "Job not started");
            return job.status();
        }
        self.emit(job.id(), JobEvent::Started);

        let outcome = self.compress(job, credential).await;
        match outcome {
            Ok((compressed_size, artifact)) => self.finish_success(job, compressed_size, artifact).await,
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(job_id = %job.id(), error = %message, "Compression failed");
                if job.fail(message.clone()).is_ok() {
                    self.emit(job.id(), JobEvent::Failed { message });
                }
            }
        }
        job.status()
    }

    async fn compress(
        &self,
        job: &mut ImageJob,
        credential: &Credential,
    ) -> Result<(u64, ArtifactRef), CompressionError> {
        self.advance(job, PROGRESS_SUBMITTING);

        let source = ImageSource::Bytes {
            name: job.original_name(),
            content_type: job.content_type(),
            data: job.original_bytes(),
        };
        let pointer = self.backend.submit(source, credential).await?;
        tracing::debug!(
            job_id = %job.id(),
            compressed_size = pointer.compressed_size,
            "Compression pointer received"
        );
        self.advance(job, PROGRESS_POINTER_RECEIVED);

        let artifact = self
            .backend
            .fetch_artifact(&pointer, job.original_name(), credential)
            .await?;
        self.advance(job, PROGRESS_ARTIFACT_FETCHED);

        Ok((pointer.compressed_size, artifact))
    }

    async fn finish_success(&self, job: &mut ImageJob, compressed_size: u64, artifact: ArtifactRef) {
        if let Err(e) = job.succeed(compressed_size, artifact.clone()) {
            tracing::error!(job_id = %job.id(), error = %e, "Could not mark job successful");
            return;
        }
        self.emit(
            job.id(),
            JobEvent::Succeeded {
                compressed_size,
                artifact,
            },
        );
        tracing::info!(
            job_id = %job.id(),
            original_size = job.original_size(),
            compressed_size,
            "Job compressed"
        );

        // History is best effort; the job stays successful either way.
        if let Some(record) = CompletedRecord::from_job(job) {
            if let Err(e) = self.history.append(record).await {
                tracing::warn!(job_id = %job.id(), error = %e, "Failed to save history entry");
            }
        }
    }

    fn advance(&self, job: &mut ImageJob, progress: u8) {
        let before = job.progress();
        if let Ok(now) = job.advance(progress) {
            if now != before {
                self.emit(job.id(), JobEvent::Progress(now));
            }
        }
    }

    fn emit(&self, job_id: Uuid, event: JobEvent) {
        if let Some(tx) = &self.updates {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(JobUpdate { job_id, event });
        }
    }
}
