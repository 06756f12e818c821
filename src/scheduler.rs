use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::ArtifactLayout;
use crate::coordinator::Coordinator;
use crate::domain::{Execution, ExecutionStatus, Job, JobSource, JobStatus};
use crate::error::{OrchestratorError, Result};
use crate::events::{EventBus, JobStateChanged};
use crate::runner::Runner;
use crate::store::MetadataStore;
use crate::supervisor::CancelHandle;
use crate::sync_ext::{CondvarExt, MutexExt};

struct SchedulerState {
    // Resumed jobs are pushed to the front, new enqueues to the back, which
    // alone realizes the resume-precedes-new priority rule from §4.6 — no
    // separate priority tag needs to survive past insertion.
    queue: VecDeque<Uuid>,
    queued_ids: std::collections::HashSet<Uuid>,
    in_flight: HashMap<Uuid, CancelHandle>,
    shutting_down: bool,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            queued_ids: std::collections::HashSet::new(),
            in_flight: HashMap::new(),
            shutting_down: false,
        }
    }
}

/// Scheduler / Worker Pool (§4.6): a fixed-size pool of worker threads
/// pulling from a single FIFO ready queue, with a mutex-protected control
/// region and per-job cancellation handles. The Runner/Coordinator execute
/// concurrently per worker; only queue/map mutation is serialized.
pub struct Scheduler {
    store: Arc<dyn MetadataStore>,
    artifacts: Arc<ArtifactLayout>,
    events: Arc<EventBus>,
    runner: Arc<Runner>,
    coordinator: Arc<Coordinator>,
    state: Arc<Mutex<SchedulerState>>,
    cv: Arc<Condvar>,
    workers: usize,
    shutdown_grace: Duration,
    worker_handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        artifacts: Arc<ArtifactLayout>,
        events: Arc<EventBus>,
        workers: usize,
        graceful_kill_timeout: Duration,
        shutdown_grace: Duration,
    ) -> Arc<Self> {
        let runner = Arc::new(Runner::new(
            artifacts.clone(),
            events.clone(),
            graceful_kill_timeout,
        ));
        let coordinator = Arc::new(Coordinator::new(
            artifacts.clone(),
            events.clone(),
            graceful_kill_timeout,
        ));

        let scheduler = Arc::new(Self {
            store,
            artifacts,
            events,
            runner,
            coordinator,
            state: Arc::new(Mutex::new(SchedulerState::new())),
            cv: Arc::new(Condvar::new()),
            workers: workers.max(1),
            shutdown_grace,
            worker_handles: Mutex::new(Vec::new()),
        });

        scheduler.spawn_workers();
        scheduler
    }

    fn spawn_workers(self: &Arc<Self>) {
        let mut handles = self.worker_handles.lock_unpoisoned();
        for index in 0..self.workers {
            let scheduler = self.clone();
            let handle = std::thread::Builder::new()
                .name(format!("orchestrator-worker-{index}"))
                .spawn(move || scheduler.worker_loop())
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
    }

    /// Runs the crash-recovery scan (§4.6): every `processing` job is
    /// certain to have lost its worker across a restart and is failed then
    /// re-enqueued; every `pending` job is re-enqueued in order. Both enter
    /// the queue at resume priority, ahead of anything enqueued afterward.
    pub fn recover_on_startup(&self) -> Result<()> {
        let active = self.store.find_active_jobs()?;
        let mut recovered = 0usize;
        for job in active {
            match job.status {
                JobStatus::Processing => {
                    for mut execution in self.store.list_executions(job.id)? {
                        if execution.status == ExecutionStatus::Processing {
                            execution.finish(
                                ExecutionStatus::Failed,
                                Some("server restarted".to_string()),
                            );
                            self.store.update_execution(&execution)?;
                        }
                    }
                    self.store
                        .update_job_status(job.id, JobStatus::Pending, None)?;
                    self.push_front(job.id);
                    recovered += 1;
                }
                JobStatus::Pending => {
                    self.push_front(job.id);
                    recovered += 1;
                }
                _ => {}
            }
        }
        info!(recovered, "startup recovery scan complete");
        self.cv.notify_all();
        Ok(())
    }

    fn push_front(&self, job_id: Uuid) {
        let mut state = self.state.lock_unpoisoned();
        if state.queued_ids.insert(job_id) {
            state.queue.push_front(job_id);
        }
    }

    /// Enqueues a job currently in `uploaded`/`completed`/`failed`/`pending`
    /// (§4.6). Re-enqueue of a terminal job clears its previous result.
    pub fn enqueue_job(&self, job_id: Uuid) -> Result<()> {
        {
            let state = self.state.lock_unpoisoned();
            if state.shutting_down {
                return Err(OrchestratorError::InvalidState {
                    job_id: job_id.to_string(),
                    reason: "scheduler is shutting down".to_string(),
                });
            }
        }

        let mut job = self.store.get_job(job_id)?;
        if job.status == JobStatus::Processing {
            return Err(OrchestratorError::AlreadyQueued(job_id.to_string()));
        }
        if !job.status.enqueueable() {
            return Err(OrchestratorError::InvalidState {
                job_id: job_id.to_string(),
                reason: format!("{:?} does not permit enqueue", job.status),
            });
        }

        if job.status.is_terminal() {
            job.reset_for_rerun();
        }
        let old_status = job.status;
        job.status = JobStatus::Pending;
        job.updated_at = Utc::now();
        self.store.save_job(&job)?;
        self.events.publish_state_changed(JobStateChanged {
            job_id,
            old: old_status,
            new: JobStatus::Pending,
            at: job.updated_at,
        });

        let mut state = self.state.lock_unpoisoned();
        if !state.queued_ids.insert(job_id) {
            return Err(OrchestratorError::AlreadyQueued(job_id.to_string()));
        }
        state.queue.push_back(job_id);
        drop(state);
        self.cv.notify_all();
        Ok(())
    }

    /// Cancels `job_id` (§4.6). Pending jobs are pulled out of the queue and
    /// failed synchronously; processing jobs are signalled and the worker
    /// commits the terminal state asynchronously once the subprocess dies.
    pub fn kill_job(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.state.lock_unpoisoned();
        if let Some(pos) = state.queue.iter().position(|&id| id == job_id) {
            state.queue.remove(pos);
            state.queued_ids.remove(&job_id);
            drop(state);
            self.store
                .update_job_status(job_id, JobStatus::Failed, Some("cancelled".to_string()))?;
            self.events.publish_state_changed(JobStateChanged {
                job_id,
                old: JobStatus::Pending,
                new: JobStatus::Failed,
                at: Utc::now(),
            });
            return Ok(());
        }

        if let Some(handle) = state.in_flight.get(&job_id) {
            handle.cancel();
            return Err(OrchestratorError::CancellationRequested(job_id.to_string()));
        }
        drop(state);

        // Not queued and not in flight: distinguish "no such job" from
        // "job exists but isn't running" (§6.2's `KillJob` contract) with a
        // store lookup rather than assuming NotFound.
        match self.store.get_job(job_id) {
            Ok(_) => Err(OrchestratorError::NotRunning(job_id.to_string())),
            Err(crate::store::StoreError::NotFound(_)) => {
                Err(OrchestratorError::NotFound(job_id.to_string()))
            }
            Err(err) => Err(OrchestratorError::Storage(err)),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.state.lock_unpoisoned().queue.len()
    }

    pub fn processing_count(&self) -> usize {
        self.state.lock_unpoisoned().in_flight.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Stops accepting new enqueues, cancels every in-flight run, and waits
    /// up to `shutdown_grace` for workers to commit terminal states. Runs
    /// still alive after the grace period are left for the next boot's
    /// recovery scan (§4.6).
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock_unpoisoned();
            state.shutting_down = true;
            for handle in state.in_flight.values() {
                handle.cancel();
            }
        }
        self.cv.notify_all();

        let deadline = Instant::now() + self.shutdown_grace;
        while Instant::now() < deadline {
            if self.processing_count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let job_id = {
                let mut state = self.state.lock_unpoisoned();
                loop {
                    if state.shutting_down {
                        return;
                    }
                    if let Some(job_id) = state.queue.pop_front() {
                        state.queued_ids.remove(&job_id);
                        break job_id;
                    }
                    state = self.cv.wait_unpoisoned(state);
                }
            };

            self.process_one(job_id);
        }
    }

    fn process_one(&self, job_id: Uuid) {
        let cancel = CancelHandle::new();
        if let Err(err) = self
            .store
            .update_job_status(job_id, JobStatus::Processing, None)
        {
            error!(%job_id, error = %err, "failed to mark job processing, re-queuing");
            self.push_front(job_id);
            return;
        }
        self.events.publish_state_changed(JobStateChanged {
            job_id,
            old: JobStatus::Pending,
            new: JobStatus::Processing,
            at: Utc::now(),
        });
        info!(%job_id, "job picked for processing");

        self.state
            .lock_unpoisoned()
            .in_flight
            .insert(job_id, cancel.clone());

        let outcome = catch_unwind(AssertUnwindSafe(|| self.execute(job_id, &cancel)));

        self.state.lock_unpoisoned().in_flight.remove(&job_id);

        let (new_status, error_message) = match outcome {
            Ok(Ok(())) => (JobStatus::Completed, None),
            Ok(Err(OrchestratorError::Cancelled)) => {
                (JobStatus::Failed, Some("cancelled".to_string()))
            }
            Ok(Err(err)) => (JobStatus::Failed, Some(err.to_string())),
            Err(payload) => (
                JobStatus::Failed,
                Some(format!("worker panicked: {}", panic_message(&*payload))),
            ),
        };

        match self
            .store
            .update_job_status(job_id, new_status, error_message.clone())
        {
            Ok(()) => {
                info!(%job_id, status = ?new_status, "job reached terminal state");
                self.events.publish_state_changed(JobStateChanged {
                    job_id,
                    old: JobStatus::Processing,
                    new: new_status,
                    at: Utc::now(),
                });
            }
            Err(err) => {
                error!(%job_id, error = %err, "failed to persist terminal job status");
            }
        }

        self.cv.notify_all();
    }

    fn execute(&self, job_id: Uuid, cancel: &CancelHandle) -> Result<()> {
        let job = self.store.get_job(job_id)?;
        let mut execution = Execution::new(job_id, job.parameters.clone());
        self.store.save_execution(&execution)?;

        let result = self.run_job(&job, cancel).and_then(|outcome| {
            self.persist_transcript(&job, &outcome.transcript)?;
            Ok(outcome)
        });

        match &result {
            Ok(outcome) => {
                execution.multi_track_timings = outcome.track_timings.clone();
                execution.merge_timings = outcome.merge_timings.clone();
                execution.finish(ExecutionStatus::Completed, None);
            }
            Err(err) => execution.finish(ExecutionStatus::Failed, Some(err.to_string())),
        }
        self.store.update_execution(&execution)?;

        result.map(|_| ())
    }

    fn persist_transcript(&self, job: &Job, transcript: &crate::domain::Transcript) -> Result<()> {
        self.artifacts.ensure_job_dir(job.id)?;
        let bytes = serde_json::to_vec_pretty(transcript)
            .map_err(crate::store::StoreError::Serialization)?;
        self.artifacts.write_result(job.id, &bytes)?;

        let mut job = job.clone();
        job.transcript = Some(transcript.clone());
        job.updated_at = Utc::now();
        self.store.save_job(&job)?;
        Ok(())
    }

    fn run_job(&self, job: &Job, cancel: &CancelHandle) -> Result<RunOutcome> {
        match &job.source {
            JobSource::SingleTrack { path } => {
                let transcript = self
                    .runner
                    .run(job.id, &job.parameters, path.as_ref(), cancel)?;
                Ok(RunOutcome::single(transcript))
            }
            JobSource::RemoteUrl { url } => {
                warn!(%job.id, url, "remote url sources are fetched by the collaborator, not the core");
                let transcript = self
                    .runner
                    .run(job.id, &job.parameters, url.as_ref(), cancel)?;
                Ok(RunOutcome::single(transcript))
            }
            JobSource::MultiTrack { tracks } => {
                let (transcript, timings, merge) =
                    self.coordinator.run(job.id, &job.parameters, tracks, cancel)?;
                Ok(RunOutcome {
                    transcript,
                    track_timings: Some(timings),
                    merge_timings: Some(merge),
                })
            }
        }
    }
}

/// Everything a single worker run produces, beyond the transcript itself:
/// the Coordinator's per-track/merge timings when the job is multi-track,
/// `None` for single-track and remote-url jobs (§4.3 Execution attributes).
struct RunOutcome {
    transcript: crate::domain::Transcript,
    track_timings: Option<Vec<crate::domain::TrackTiming>>,
    merge_timings: Option<crate::domain::MergeTimings>,
}

impl RunOutcome {
    fn single(transcript: crate::domain::Transcript) -> Self {
        Self {
            transcript,
            track_timings: None,
            merge_timings: None,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Parameters;
    use crate::store::SqliteStore;

    fn sample_job(source: JobSource) -> Job {
        Job {
            id: Uuid::new_v4(),
            title: None,
            source,
            is_multi_track: false,
            parameters: Parameters::default(),
            status: JobStatus::Uploaded,
            transcript: None,
            summary: None,
            error_message: None,
            diarization: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn build_scheduler(store: Arc<dyn MetadataStore>) -> (Arc<Scheduler>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(ArtifactLayout::new(
            dir.path().join("uploads"),
            dir.path().join("transcripts"),
        ));
        let events = Arc::new(EventBus::new());
        let scheduler = Scheduler::new(
            store,
            artifacts,
            events,
            1,
            Duration::from_secs(5),
            Duration::from_secs(10),
        );
        (scheduler, dir)
    }

    #[test]
    fn enqueue_rejects_double_queueing() {
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let job = sample_job(JobSource::SingleTrack {
            path: "/tmp/missing.wav".into(),
        });
        store.save_job(&job).unwrap();
        let (scheduler, _dir) = build_scheduler(store);

        scheduler.enqueue_job(job.id).unwrap();
        let err = scheduler.enqueue_job(job.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyQueued(_)));
        scheduler.shutdown();
    }

    #[test]
    fn kill_pending_job_fails_it_synchronously() {
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let job = sample_job(JobSource::SingleTrack {
            path: "/tmp/missing.wav".into(),
        });
        store.save_job(&job).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(ArtifactLayout::new(
            dir.path().join("uploads"),
            dir.path().join("transcripts"),
        ));
        let events = Arc::new(EventBus::new());

        // Zero workers would starve the queue forever; use one worker but
        // immediately shut it down so the enqueued job never gets picked,
        // leaving it reliably in the `pending` queue for kill_job to find.
        let scheduler = Scheduler::new(
            store.clone(),
            artifacts,
            events,
            1,
            Duration::from_secs(5),
            Duration::from_secs(10),
        );
        scheduler.state.lock_unpoisoned().shutting_down = true;

        scheduler.enqueue_job(job.id).unwrap();
        scheduler.kill_job(job.id).unwrap();

        let stored = store.get_job(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("cancelled"));
    }

    #[test]
    fn kill_job_on_a_non_running_job_returns_not_running() {
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let job = sample_job(JobSource::SingleTrack {
            path: "/tmp/missing.wav".into(),
        });
        store.save_job(&job).unwrap();
        let (scheduler, _dir) = build_scheduler(store);

        let err = scheduler.kill_job(job.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::NotRunning(_)));
        scheduler.shutdown();
    }

    #[test]
    fn kill_job_on_an_unknown_job_returns_not_found() {
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let (scheduler, _dir) = build_scheduler(store);

        let err = scheduler.kill_job(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
        scheduler.shutdown();
    }

    #[test]
    fn recover_on_startup_requeues_processing_and_pending_jobs() {
        let store: Arc<dyn MetadataStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut stuck = sample_job(JobSource::SingleTrack {
            path: "/tmp/a.wav".into(),
        });
        stuck.status = JobStatus::Processing;
        store.save_job(&stuck).unwrap();

        let exec = Execution::new(stuck.id, stuck.parameters.clone());
        store.save_execution(&exec).unwrap();

        let (scheduler, _dir) = build_scheduler(store.clone());
        scheduler.state.lock_unpoisoned().shutting_down = true;

        scheduler.recover_on_startup().unwrap();

        let recovered = store.get_job(stuck.id).unwrap();
        assert_eq!(recovered.status, JobStatus::Pending);
        assert_eq!(scheduler.queue_depth(), 1);

        let executions = store.list_executions(stuck.id).unwrap();
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert_eq!(
            executions[0].error_message.as_deref(),
            Some("server restarted")
        );
    }
}
