//! Transcription Job Orchestration Engine.
//!
//! This crate is the durable, cancellable, concurrency-controlled pipeline
//! described by the project's specification: it accepts job submissions,
//! schedules them against a bounded pool of worker slots, supervises
//! external transcription subprocesses with streaming progress and logs,
//! handles multi-track fan-out/fan-in, and drives state transitions under
//! crash and cancellation. HTTP surfaces, LLM chat/summary, upload parsing,
//! and the embedded UI are deliberately out of scope; this crate exposes
//! the operations those collaborators call through [`Orchestrator`].

pub mod artifacts;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod supervisor;
mod sync_ext;

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

pub use config::{Config, ConfigError};
pub use domain::{Execution, Job, JobSource, JobStatus, Parameters, TrackFile};
pub use error::{OrchestratorError, Result};
pub use events::{EventBus, JobLogLine, JobProgress, JobStateChanged, Phase, Subscription};

use artifacts::ArtifactLayout;
use scheduler::Scheduler;
use store::{MetadataStore, SqliteStore};

/// Snapshot of scheduler occupancy (`GetQueueStats`, §4.7). `workers` and
/// `capacity` are the same configured worker-pool size reported under two
/// names, matching the shape the specification's scenario 5 asserts
/// against (`{pending, processing, capacity}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub workers: usize,
    pub capacity: usize,
}

/// Job Orchestrator facade (§4.7): the single entry point collaborators —
/// an HTTP handler, a CLI, CSV-batch ingestion — call into. Every
/// dependency arrives through a constructor; there are no implicit globals
/// (§9's re-architecture note on the teacher's process-wide database
/// handle and package-level singletons).
pub struct Orchestrator {
    store: Arc<dyn MetadataStore>,
    artifacts: Arc<ArtifactLayout>,
    events: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
}

impl Orchestrator {
    /// Opens (or creates) the SQLite-backed Metadata Store at
    /// `config.database_path`, wires the Artifact Layout / Event Bus /
    /// Scheduler, runs the crash-recovery scan, and starts the worker
    /// pool. This is the entry point a real process boots from.
    pub fn new(config: &Config) -> Result<Arc<Self>> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteStore::open(&config.database_path)?);
        Self::with_store(config, store)
    }

    /// Same wiring as [`Orchestrator::new`] but against a caller-supplied
    /// store, so tests can use `SqliteStore::open_in_memory()` (or any
    /// other `MetadataStore` implementation) without touching disk.
    pub fn with_store(config: &Config, store: Arc<dyn MetadataStore>) -> Result<Arc<Self>> {
        let artifacts = Arc::new(ArtifactLayout::new(
            config.upload_dir.clone(),
            config.transcripts_dir.clone(),
        ));
        let events = Arc::new(EventBus::new());
        let scheduler = Scheduler::new(
            store.clone(),
            artifacts.clone(),
            events.clone(),
            config.workers,
            config.graceful_kill_timeout,
            config.shutdown_grace,
        );
        scheduler.recover_on_startup()?;
        info!(workers = config.workers, "orchestrator ready");

        Ok(Arc::new(Self {
            store,
            artifacts,
            events,
            scheduler,
        }))
    }

    /// `EnqueueJob(jobID)` (§4.7/§6.2). Requires the job to be in
    /// `uploaded`/`completed`/`failed`/`pending`; a job already `pending`
    /// or `processing` returns `AlreadyQueued` rather than erroring.
    pub fn enqueue_job(&self, job_id: Uuid) -> Result<()> {
        self.scheduler.enqueue_job(job_id)
    }

    /// `KillJob(jobID)` (§4.7/§6.2). Asynchronous: returns
    /// `CancellationRequested` immediately; the job reaches a terminal
    /// state within `graceful_kill_timeout` once the Supervisor has killed
    /// the subprocess.
    pub fn kill_job(&self, job_id: Uuid) -> Result<()> {
        self.scheduler.kill_job(job_id)
    }

    /// `GetJobStatus(jobID)` (§4.7/§6.2).
    pub fn get_job_status(&self, job_id: Uuid) -> Result<Job> {
        Ok(self.store.get_job(job_id)?)
    }

    /// `GetQueueStats()` (§4.7/§6.2).
    pub fn get_queue_stats(&self) -> QueueStats {
        let workers = self.scheduler.worker_count();
        QueueStats {
            pending: self.scheduler.queue_depth(),
            processing: self.scheduler.processing_count(),
            workers,
            capacity: workers,
        }
    }

    /// `DeleteJob(jobID)` (§6.2): refuses when the job is `processing`,
    /// otherwise removes its artifacts and metadata row. Cascading deletion
    /// of collaborator-owned records (notes, chats, summaries, speaker
    /// mappings) is the caller's responsibility — this crate only deletes
    /// what it owns.
    pub fn delete_job(&self, job_id: Uuid) -> Result<()> {
        let job = self.store.get_job(job_id)?;
        if job.status == JobStatus::Processing {
            return Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                reason: "cannot delete a processing job".to_string(),
            });
        }
        self.artifacts.remove_job_artifacts(job_id)?;
        self.store.delete_job(job_id)?;
        Ok(())
    }

    /// Subscribes to the Event Bus (§4.8); the returned handle is what an
    /// SSE bridge collaborator polls for state/progress/log events.
    pub fn subscribe(&self) -> Arc<Subscription> {
        self.events.subscribe()
    }

    /// Grants read access to the Artifact Layout (§4.2) so a collaborator
    /// can stream `result.json` or the transcription log back to a caller
    /// without this crate needing to know about HTTP responses.
    pub fn artifacts(&self) -> &ArtifactLayout {
        &self.artifacts
    }

    /// Stops accepting new enqueues, cancels every in-flight run, and waits
    /// up to `shutdown_grace` for workers to commit terminal states (§4.6).
    /// Runs still alive after the grace period are left for the next
    /// boot's recovery scan.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            workers: 2,
            upload_dir: dir.join("uploads"),
            transcripts_dir: dir.join("transcripts"),
            database_path: dir.join("orchestrator.sqlite3"),
            graceful_kill_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }

    #[test]
    fn new_orchestrator_starts_with_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let orchestrator = Orchestrator::new(&config).unwrap();
        let stats = orchestrator.get_queue_stats();
        assert_eq!(stats, QueueStats {
            pending: 0,
            processing: 0,
            workers: 2,
            capacity: 2,
        });
        orchestrator.shutdown();
    }

    #[test]
    fn delete_job_refuses_while_processing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let orchestrator = Orchestrator::with_store(&config, store.clone()).unwrap();

        let job = Job {
            id: Uuid::new_v4(),
            title: None,
            source: JobSource::SingleTrack {
                path: "/tmp/a.wav".into(),
            },
            is_multi_track: false,
            parameters: Parameters::default(),
            status: JobStatus::Processing,
            transcript: None,
            summary: None,
            error_message: None,
            diarization: false,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        store.save_job(&job).unwrap();

        let err = orchestrator.delete_job(job.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidState { .. }));
        orchestrator.shutdown();
    }

    #[test]
    fn get_job_status_surfaces_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let orchestrator = Orchestrator::new(&config).unwrap();
        let err = orchestrator.get_job_status(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Storage(_)));
        orchestrator.shutdown();
    }
}
