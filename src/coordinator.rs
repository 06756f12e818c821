use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::artifacts::ArtifactLayout;
use crate::domain::transcript::{merge_tracks, TaggedTrack};
use crate::domain::{MergeTimings, Parameters, Transcript, TrackFile, TrackTiming};
use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::runner::Runner;
use crate::supervisor::{CancelHandle, CommandSpec, ProcessSupervisor, SupervisorError};

const MERGED_AUDIO_EXTENSION: &str = "wav";

/// Multi-Track Coordinator (§4.5): fans a job's `TrackFile`s out to one
/// Runner invocation each, run in parallel and joined back in the worker's
/// own call stack (no extra scheduler slot is consumed), then merges the
/// per-track transcripts and produces a merged audio artifact.
pub struct Coordinator {
    artifacts: Arc<ArtifactLayout>,
    events: Arc<EventBus>,
    graceful_kill_timeout: Duration,
}

impl Coordinator {
    pub fn new(
        artifacts: Arc<ArtifactLayout>,
        events: Arc<EventBus>,
        graceful_kill_timeout: Duration,
    ) -> Self {
        Self {
            artifacts,
            events,
            graceful_kill_timeout,
        }
    }

    /// Runs every track through its own Runner concurrently. Any track
    /// failure fails the whole execution; successful tracks' partial
    /// artifacts are retained on disk for debugging but never merged into
    /// the job's transcript (§4.5).
    pub fn run(
        &self,
        job_id: Uuid,
        params: &Parameters,
        tracks: &[TrackFile],
        cancel: &CancelHandle,
    ) -> Result<(Transcript, Vec<TrackTiming>, MergeTimings)> {
        let runner = Arc::new(Runner::new(
            self.artifacts.clone(),
            self.events.clone(),
            self.graceful_kill_timeout,
        ));

        let handles: Vec<_> = tracks
            .iter()
            .cloned()
            .map(|track| {
                let runner = runner.clone();
                let artifacts = self.artifacts.clone();
                let params = params.clone();
                let cancel = cancel.clone();
                std::thread::spawn(move || -> Result<(TrackFile, Transcript, TrackTiming)> {
                    let start = Utc::now();
                    let work_dir = artifacts.track_work_dir(job_id, track.track_index);
                    let transcript =
                        runner.run_in(job_id, &params, track.path.as_ref(), &work_dir, &cancel)?;
                    let end = Utc::now();
                    let timing = TrackTiming {
                        track_name: track.display_name.clone(),
                        start,
                        end,
                        duration_ms: (end - start).num_milliseconds().max(0) as u64,
                    };
                    Ok((track, transcript, timing))
                })
            })
            .collect();

        let mut tagged = Vec::with_capacity(handles.len());
        let mut timings = Vec::with_capacity(handles.len());
        let mut first_error = None;

        for handle in handles {
            match handle.join() {
                Ok(Ok((track, transcript, timing))) => {
                    tagged.push(TaggedTrack {
                        track_index: track.track_index,
                        display_name: track.display_name,
                        transcript,
                    });
                    timings.push(timing);
                }
                Ok(Err(err)) => first_error.get_or_insert(err),
                Err(_) => first_error.get_or_insert(OrchestratorError::EngineFailure {
                    exit_code: -1,
                    log_tail: "track worker thread panicked".to_string(),
                }),
            };
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        let language = params
            .language
            .clone()
            .unwrap_or_else(|| "en".to_string());
        let transcript = merge_tracks(tagged, language);

        let merge_start = Utc::now();
        let merged_audio_path = self
            .artifacts
            .merged_audio_path(job_id, MERGED_AUDIO_EXTENSION);
        self.run_audio_merge(tracks, &merged_audio_path, cancel)?;
        let merge_end = Utc::now();

        let merge_timings = MergeTimings {
            merge_start_time: merge_start,
            merge_end_time: merge_end,
            merge_duration_ms: (merge_end - merge_start).num_milliseconds().max(0) as u64,
            merged_audio_path: merged_audio_path.to_string_lossy().into_owned(),
        };

        Ok((transcript, timings, merge_timings))
    }

    /// Invokes an external audio-merge tool through the Supervisor,
    /// treated as a black box that must succeed before the execution can
    /// reach `completed` (§4.5).
    fn run_audio_merge(
        &self,
        tracks: &[TrackFile],
        merged_audio_path: &std::path::Path,
        cancel: &CancelHandle,
    ) -> Result<()> {
        if let Some(parent) = merged_audio_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut args: Vec<String> = tracks.iter().map(|t| t.path.clone()).collect();
        args.push("--output".into());
        args.push(merged_audio_path.to_string_lossy().into_owned());

        let spec = CommandSpec {
            program: "audio_merge".to_string(),
            args,
            env: Default::default(),
            cwd: None,
        };

        let supervisor = ProcessSupervisor::new();
        let outcome = supervisor.run(
            spec,
            cancel,
            self.graceful_kill_timeout,
            |_| {},
            |_| {},
        );

        match outcome {
            Ok(0) => Ok(()),
            Ok(code) => Err(OrchestratorError::EngineFailure {
                exit_code: code,
                log_tail: "audio merge tool exited non-zero".to_string(),
            }),
            Err(SupervisorError::Cancelled) => Err(OrchestratorError::Cancelled),
            Err(SupervisorError::Spawn(io_err)) => Err(OrchestratorError::Io(io_err)),
        }
    }
}
