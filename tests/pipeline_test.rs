//! Batch pipeline tests against an in-process backend.

mod fixtures;
mod helpers;

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use tiny_squeeze::models::credential::Credential;
use tiny_squeeze::models::history::{ArtifactRef, StoredArtifact};
use tiny_squeeze::models::job::{ImageJob, JobEvent, JobStatus, JobUpdate, JobView};
use tiny_squeeze::services::history::HistoryStore;
use tiny_squeeze::services::kv::{KeyValueStore, MemoryStore};
use tiny_squeeze::services::orchestrator::{BatchError, BatchOrchestrator};
use tiny_squeeze::services::session::{CompressionSession, SessionError};

use fixtures::{jpeg_bytes, png_bytes, COMPRESSED_ARTIFACT};
use helpers::{FakeBackend, ReadOnlyStore};

fn history_over(store: Arc<dyn KeyValueStore>) -> Arc<HistoryStore> {
    Arc::new(HistoryStore::new(store))
}

fn session_with(backend: Arc<FakeBackend>) -> CompressionSession {
    let orchestrator = BatchOrchestrator::new(backend, history_over(Arc::new(MemoryStore::new())));
    CompressionSession::new(orchestrator).with_credential(Credential::user_input("good-key"))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<JobUpdate>, job_id: Uuid) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(update) = rx.try_recv() {
        if update.job_id == job_id {
            events.push(update.event);
        }
    }
    events
}

#[tokio::test]
async fn test_one_failure_does_not_affect_siblings() {
    let backend = FakeBackend::new();
    backend.fail_submit("b.png", "Too many requests");
    let mut session = session_with(backend.clone());

    let report = session
        .submit_batch(vec![
            ("a.png", png_bytes(1000)),
            ("b.png", png_bytes(2000)),
            ("c.jpg", jpeg_bytes(3000)),
        ])
        .await
        .unwrap();

    assert_eq!(report.dispatched, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);

    let jobs = session.jobs();
    assert_eq!(jobs[0].status(), JobStatus::Success);
    assert_eq!(jobs[0].compressed_size(), Some(500));
    assert_eq!(jobs[1].status(), JobStatus::Error);
    assert_eq!(jobs[1].error(), Some("Too many requests"));
    assert!(jobs[1].compressed().is_none());
    assert_eq!(jobs[2].status(), JobStatus::Success);
    assert_eq!(jobs[2].compressed_size(), Some(1500));

    // Every job was submitted exactly once.
    let mut submitted = backend.submissions();
    submitted.sort();
    assert_eq!(submitted, vec!["a.png", "b.png", "c.jpg"]);

    // Only successful jobs reach history.
    let history = session.history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|entry| entry.original_name != "b.png"));
}

#[tokio::test]
async fn test_fetch_failure_marks_only_that_job() {
    let backend = FakeBackend::new();
    backend.fail_fetch("a.png");
    let mut session = session_with(backend);

    session
        .submit_batch(vec![("a.png", png_bytes(100)), ("b.png", png_bytes(100))])
        .await
        .unwrap();

    assert_eq!(session.jobs()[0].status(), JobStatus::Error);
    assert_eq!(
        session.jobs()[0].error(),
        Some("Failed to download compressed image")
    );
    assert_eq!(session.jobs()[1].status(), JobStatus::Success);
}

#[tokio::test]
async fn test_progress_events_in_order() {
    let backend = FakeBackend::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator =
        BatchOrchestrator::new(backend, history_over(Arc::new(MemoryStore::new()))).with_updates(tx);
    let mut session =
        CompressionSession::new(orchestrator).with_credential(Credential::user_input("k"));

    let ids = session.add_images(vec![("a.png", png_bytes(400))]).unwrap();
    let mut view = JobView::of(session.job(ids[0]).unwrap());
    session.compress_pending().await.unwrap();

    let events = drain(&mut rx, ids[0]);
    assert_eq!(
        events,
        vec![
            JobEvent::Started,
            JobEvent::Progress(25),
            JobEvent::Progress(50),
            JobEvent::Progress(75),
            JobEvent::Succeeded {
                compressed_size: 200,
                artifact: ArtifactRef::Inline {
                    bytes: COMPRESSED_ARTIFACT.to_vec(),
                    content_type: "image/png".to_string(),
                },
            },
        ]
    );

    // Replaying the stream reproduces the job's final state.
    for event in events {
        view.apply(&JobUpdate {
            job_id: ids[0],
            event,
        });
    }
    assert_eq!(view, JobView::of(session.job(ids[0]).unwrap()));
    assert_eq!(view.progress, 100);
}

#[tokio::test]
async fn test_retry_recovers_failed_job() {
    let backend = FakeBackend::new();
    backend.fail_submit("flaky.png", "Service unavailable");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = BatchOrchestrator::new(
        backend.clone(),
        history_over(Arc::new(MemoryStore::new())),
    )
    .with_updates(tx);
    let mut session =
        CompressionSession::new(orchestrator).with_credential(Credential::user_input("k"));

    session
        .submit_batch(vec![("flaky.png", png_bytes(800))])
        .await
        .unwrap();
    let id = session.jobs()[0].id();
    assert_eq!(session.job(id).unwrap().status(), JobStatus::Error);
    drain(&mut rx, id);

    backend.recover("flaky.png");
    let status = session.retry(id).await.unwrap();
    assert_eq!(status, JobStatus::Success);

    let job = session.job(id).unwrap();
    assert!(job.error().is_none());
    assert_eq!(job.compressed_size(), Some(400));
    assert_eq!(job.progress(), 100);

    let events = drain(&mut rx, id);
    assert_eq!(events[0], JobEvent::Reset);
    assert_eq!(events[1], JobEvent::Started);
    assert!(matches!(events.last(), Some(JobEvent::Succeeded { .. })));
    assert_eq!(backend.submissions().len(), 2);
}

#[tokio::test]
async fn test_retry_rejects_non_failed_jobs() {
    let backend = FakeBackend::new();
    let mut session = session_with(backend);

    let ids = session.add_images(vec![("a.png", png_bytes(10))]).unwrap();
    let err = session.retry(ids[0]).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::NotRetryable {
            status: JobStatus::Idle,
            ..
        }
    ));

    let err = session.retry(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, SessionError::UnknownJob(_)));
}

#[tokio::test]
async fn test_savings_scenario() {
    let backend = FakeBackend::new();
    backend.compress_to("photo.png", 400_000);
    let mut session = session_with(backend);

    session
        .submit_batch(vec![("photo.png", png_bytes(1_000_000))])
        .await
        .unwrap();

    let job = &session.jobs()[0];
    assert_eq!(job.status(), JobStatus::Success);
    assert_eq!(job.original_size(), 1_000_000);
    assert_eq!(job.compressed_size(), Some(400_000));

    let history = session.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert!((history[0].savings_percent - 60.0).abs() < 1e-9);
    assert!(matches!(
        history[0].artifact,
        Some(StoredArtifact::CompressedDataUrl(ref url)) if url.starts_with("data:image/png;base64,")
    ));

    let stats = session.stats().await.unwrap();
    let current = stats.session.unwrap();
    assert_eq!(current.count, 1);
    assert_eq!(current.saved_bytes, 600_000);
    assert!((current.savings_percent - 60.0).abs() < 1e-9);
    assert_eq!(stats.all_time.unwrap().count, 1);
}

#[tokio::test]
async fn test_successful_jobs_are_not_reprocessed() {
    let backend = FakeBackend::new();
    let mut session = session_with(backend.clone());

    session
        .submit_batch(vec![("a.png", png_bytes(100))])
        .await
        .unwrap();
    let report = session
        .submit_batch(vec![("b.png", png_bytes(100))])
        .await
        .unwrap();

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(backend.submissions(), vec!["a.png", "b.png"]);
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_missing_credential_dispatches_nothing() {
    let backend = FakeBackend::new();
    let orchestrator =
        BatchOrchestrator::new(backend.clone(), history_over(Arc::new(MemoryStore::new())));
    let mut session = CompressionSession::new(orchestrator);

    let err = session
        .submit_batch(vec![("a.png", png_bytes(100))])
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::MissingCredential));
    assert!(session.jobs().is_empty());

    session.add_images(vec![("a.png", png_bytes(100))]).unwrap();
    let err = session.compress_pending().await.unwrap_err();
    assert!(matches!(err, SessionError::MissingCredential));
    assert_eq!(session.jobs()[0].status(), JobStatus::Idle);
    assert!(backend.submissions().is_empty());
}

#[tokio::test]
async fn test_invalid_intake_adds_nothing() {
    let backend = FakeBackend::new();
    let mut session = session_with(backend.clone());

    let err = session
        .submit_batch(vec![
            ("a.png", png_bytes(100)),
            ("notes.txt", b"plain text".to_vec()),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Intake(_)));
    assert!(session.jobs().is_empty());
    assert!(backend.submissions().is_empty());
}

#[tokio::test]
async fn test_history_write_failure_keeps_job_successful() {
    let backend = FakeBackend::new();
    let orchestrator = BatchOrchestrator::new(backend, history_over(Arc::new(ReadOnlyStore)));
    let mut session =
        CompressionSession::new(orchestrator).with_credential(Credential::user_input("k"));

    let report = session
        .submit_batch(vec![("a.png", png_bytes(100))])
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(session.jobs()[0].status(), JobStatus::Success);
    assert!(session.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_job_rejected() {
    let backend = FakeBackend::new();
    let orchestrator =
        BatchOrchestrator::new(backend.clone(), history_over(Arc::new(MemoryStore::new())));

    let job = ImageJob::from_bytes("a.png", png_bytes(100)).unwrap();
    let mut jobs = vec![job.clone(), job];
    let err = orchestrator
        .process(&mut jobs, &Credential::user_input("k"))
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::DuplicateJob(_)));
    assert!(jobs.iter().all(|job| job.status() == JobStatus::Idle));
    assert!(backend.submissions().is_empty());
}

#[tokio::test]
async fn test_clear_history_keeps_session_jobs() {
    let backend = FakeBackend::new();
    let mut session = session_with(backend);

    session
        .submit_batch(vec![("a.png", png_bytes(100)), ("b.png", png_bytes(100))])
        .await
        .unwrap();
    assert_eq!(session.history().await.unwrap().len(), 2);

    session.clear_history().await.unwrap();
    assert!(session.history().await.unwrap().is_empty());
    assert_eq!(session.jobs().len(), 2);

    let stats = session.stats().await.unwrap();
    assert!(stats.session.is_some());
    assert!(stats.all_time.is_none());
}
