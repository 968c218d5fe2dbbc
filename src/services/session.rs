//! Inbound surface: submit a batch, retry a job, clear history.

use uuid::Uuid;

use crate::models::credential::Credential;
use crate::models::history::HistoryEntry;
use crate::models::job::{ImageJob, IntakeError, JobStatus, JobView};
use crate::services::credentials::{CredentialError, CredentialResolver, SaveOutcome};
use crate::services::history::HistoryError;
use crate::services::orchestrator::{BatchError, BatchOrchestrator, BatchReport};
use crate::services::stats::Stats;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("an API key is required before compressing")]
    MissingCredential,

    #[error("no job with id {0}")]
    UnknownJob(Uuid),

    #[error("job {id} is {status}; only failed jobs can be retried")]
    NotRetryable { id: Uuid, status: JobStatus },

    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// The live job list of one user session plus its collaborators.
pub struct CompressionSession {
    orchestrator: BatchOrchestrator,
    resolver: Option<CredentialResolver>,
    credential: Option<Credential>,
    jobs: Vec<ImageJob>,
}

impl CompressionSession {
    pub fn new(orchestrator: BatchOrchestrator) -> Self {
        Self {
            orchestrator,
            resolver: None,
            credential: None,
            jobs: Vec::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: CredentialResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Resolve the active credential through the configured strategies.
    pub async fn resolve_credential(&mut self) -> Option<&Credential> {
        if let Some(resolver) = &self.resolver {
            self.credential = resolver.resolve().await;
        }
        self.credential.as_ref()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Save user input as the active credential. Empty input keeps the
    /// current credential and reports edit mode.
    pub fn save_credential(&mut self, input: &str) -> Result<SaveOutcome, SessionError> {
        let outcome = match &self.resolver {
            Some(resolver) => resolver.save(self.credential.as_ref(), input)?,
            None if input.trim().is_empty() => SaveOutcome::EditMode,
            None => SaveOutcome::Saved(Credential::user_input(input.trim())),
        };
        if let SaveOutcome::Saved(credential) = &outcome {
            self.credential = Some(credential.clone());
        }
        Ok(outcome)
    }

    /// Intake images. Any invalid image rejects the whole call and adds nothing.
    pub fn add_images<I, N>(&mut self, images: I) -> Result<Vec<Uuid>, SessionError>
    where
        I: IntoIterator<Item = (N, Vec<u8>)>,
        N: Into<String>,
    {
        let new_jobs = images
            .into_iter()
            .map(|(name, bytes)| ImageJob::from_bytes(name, bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.push_jobs(new_jobs))
    }

    /// Add already-validated jobs (e.g. built with [`ImageJob::from_path`]).
    pub fn push_jobs(&mut self, new_jobs: Vec<ImageJob>) -> Vec<Uuid> {
        let ids = new_jobs.iter().map(ImageJob::id).collect();
        self.jobs.extend(new_jobs);
        ids
    }

    /// `submitBatch`: intake the images, then compress everything pending.
    pub async fn submit_batch<I, N>(&mut self, images: I) -> Result<BatchReport, SessionError>
    where
        I: IntoIterator<Item = (N, Vec<u8>)>,
        N: Into<String>,
    {
        self.require_credential()?;
        self.add_images(images)?;
        self.compress_pending().await
    }

    /// Compress every idle or failed job.
    pub async fn compress_pending(&mut self) -> Result<BatchReport, SessionError> {
        let credential = self.require_credential()?.clone();
        Ok(self.orchestrator.process(&mut self.jobs, &credential).await?)
    }

    /// `retry(jobId)`: re-run the pipeline for one failed job only.
    pub async fn retry(&mut self, id: Uuid) -> Result<JobStatus, SessionError> {
        let credential = self.require_credential()?.clone();
        let job = self
            .jobs
            .iter_mut()
            .find(|job| job.id() == id)
            .ok_or(SessionError::UnknownJob(id))?;
        if job.status() != JobStatus::Error {
            return Err(SessionError::NotRetryable {
                id,
                status: job.status(),
            });
        }
        self.orchestrator
            .retry(job, &credential)
            .await
            .map_err(|e| SessionError::NotRetryable {
                id,
                status: e.from,
            })
    }

    /// Stop tracking a job. Returns whether it was present.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.id() != id);
        self.jobs.len() != before
    }

    /// `clearHistory()`
    pub async fn clear_history(&self) -> Result<(), SessionError> {
        Ok(self.orchestrator.history().clear().await?)
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, SessionError> {
        Ok(self.orchestrator.history().list().await?)
    }

    pub async fn stats(&self) -> Result<Stats, SessionError> {
        let history = self.history().await?;
        Ok(Stats::compute(&self.jobs, &history))
    }

    pub fn jobs(&self) -> &[ImageJob] {
        &self.jobs
    }

    pub fn job(&self, id: Uuid) -> Option<&ImageJob> {
        self.jobs.iter().find(|job| job.id() == id)
    }

    pub fn views(&self) -> Vec<JobView> {
        self.jobs.iter().map(JobView::of).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.jobs.iter().filter(|job| job.is_eligible()).count()
    }

    fn require_credential(&self) -> Result<&Credential, SessionError> {
        self.credential.as_ref().ok_or(SessionError::MissingCredential)
    }
}
