use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::artifacts::ArtifactLayout;
use crate::domain::{Parameters, Transcript};
use crate::engine::{select_adapter, EngineAdapter};
use crate::error::{OrchestratorError, Result};
use crate::events::{EventBus, JobLogLine, JobProgress, Phase};
use crate::supervisor::{CancelHandle, CommandSpec, ProcessSupervisor, SupervisorError};

const LOG_TAIL_BYTES: usize = 4096;

/// Transcription Runner (§4.4): one job (or, from the Coordinator, one
/// track) run through its engine adapter. Owns none of the state machine;
/// it only executes and reports the outcome.
pub struct Runner {
    artifacts: Arc<ArtifactLayout>,
    events: Arc<EventBus>,
    graceful_kill_timeout: Duration,
}

impl Runner {
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

    /// Runs `input_path` through the engine selected by
    /// `params.model_family`, streaming its stdout/stderr into the job's
    /// log and into the Event Bus, and returns the parsed, validated
    /// transcript on success.
    pub fn run(
        &self,
        job_id: Uuid,
        params: &Parameters,
        input_path: &Path,
        cancel: &CancelHandle,
    ) -> Result<Transcript> {
        self.artifacts.ensure_job_dir(job_id)?;
        let work_dir = self.artifacts.job_transcript_dir(job_id);
        self.run_in(job_id, params, input_path, &work_dir, cancel)
    }

    /// Same contract as [`Runner::run`] but against an explicit work
    /// directory, so the Multi-Track Coordinator can isolate each track's
    /// `result.json` under its own subdirectory instead of the job's
    /// shared transcript directory.
    pub fn run_in(
        &self,
        job_id: Uuid,
        params: &Parameters,
        input_path: &Path,
        work_dir: &Path,
        cancel: &CancelHandle,
    ) -> Result<Transcript> {
        std::fs::create_dir_all(work_dir)?;
        let work_dir = work_dir.to_path_buf();

        let adapter = select_adapter(params.model_family);
        let invocation = adapter.build(params, input_path, &work_dir);

        let spec = CommandSpec {
            program: invocation.program,
            args: invocation.args,
            env: invocation.env,
            cwd: Some(work_dir.clone()),
        };

        let events = self.events.clone();
        let artifacts = self.artifacts.clone();
        let on_stdout = {
            let events = events.clone();
            let artifacts = artifacts.clone();
            move |line: String| {
                let _ = artifacts.append_log(job_id, &line);
                if let Some(progress) = parse_progress_line(job_id, &line) {
                    events.publish_progress(progress);
                }
                events.publish_log_line(JobLogLine {
                    job_id,
                    line,
                });
            }
        };
        let on_stderr = move |line: String| {
            let _ = artifacts.append_log(job_id, &line);
            events.publish_log_line(JobLogLine { job_id, line });
        };

        let supervisor = ProcessSupervisor::new();
        let outcome = supervisor.run(spec, cancel, self.graceful_kill_timeout, on_stdout, on_stderr);

        let exit_code = match outcome {
            Ok(code) => code,
            Err(SupervisorError::Cancelled) => return Err(OrchestratorError::Cancelled),
            Err(SupervisorError::Spawn(io_err)) => return Err(OrchestratorError::Io(io_err)),
        };

        if exit_code != 0 {
            let log_tail = self
                .artifacts
                .read_log_tail(job_id, LOG_TAIL_BYTES)
                .unwrap_or_default();
            return Err(OrchestratorError::EngineFailure {
                exit_code,
                log_tail,
            });
        }

        let transcript = adapter.parse_result(&work_dir)?;
        Ok(transcript)
    }
}

/// Engine stdout is expected to emit `key=value` progress lines, mirroring
/// the `-progress pipe:1` convention: `phase=asr fraction=0.42`, with an
/// optional trailing `message=...` token. Any other line is just a log
/// line.
fn parse_progress_line(job_id: Uuid, line: &str) -> Option<JobProgress> {
    let mut phase: Option<Phase> = None;
    let mut fraction: Option<f64> = None;
    let mut message: Option<String> = None;

    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("phase=") {
            phase = parse_phase(rest);
        } else if let Some(rest) = token.strip_prefix("fraction=") {
            fraction = rest.parse::<f64>().ok();
        } else if let Some(rest) = token.strip_prefix("message=") {
            message = Some(rest.to_string());
        }
    }

    Some(JobProgress {
        job_id,
        phase: phase?,
        fraction: fraction?.clamp(0.0, 1.0),
        message,
    })
}

fn parse_phase(s: &str) -> Option<Phase> {
    match s {
        "load" => Some(Phase::Load),
        "asr" => Some(Phase::Asr),
        "align" => Some(Phase::Align),
        "diarize" => Some(Phase::Diarize),
        "merge" => Some(Phase::Merge),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_progress_line_extracts_phase_and_fraction() {
        let id = Uuid::new_v4();
        let progress = parse_progress_line(id, "phase=asr fraction=0.5").unwrap();
        assert_eq!(progress.phase, Phase::Asr);
        assert!((progress.fraction - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_progress_line_clamps_fraction_to_unit_interval() {
        let id = Uuid::new_v4();
        let progress = parse_progress_line(id, "phase=align fraction=1.5").unwrap();
        assert!((progress.fraction - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_progress_line_ignores_lines_without_phase() {
        let id = Uuid::new_v4();
        assert!(parse_progress_line(id, "loading model weights...").is_none());
    }

    #[test]
    fn parse_progress_line_carries_optional_message() {
        let id = Uuid::new_v4();
        let progress =
            parse_progress_line(id, "phase=merge fraction=0.9 message=stitching_tracks").unwrap();
        assert_eq!(progress.message.as_deref(), Some("stitching_tracks"));
    }

    #[test]
    fn run_surfaces_engine_failure_with_log_tail() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(ArtifactLayout::new(
            dir.path().join("uploads"),
            dir.path().join("transcripts"),
        ));
        let events = Arc::new(EventBus::new());
        let runner = Runner::new(artifacts, events, Duration::from_secs(5));

        let params = Parameters::default();
        // whisperx is not on PATH in a test sandbox; the spawn failure
        // should surface as an Io error rather than panicking.
        let job_id = Uuid::new_v4();
        let cancel = CancelHandle::new();
        let result = runner.run(
            job_id,
            &params,
            Path::new("/nonexistent/input.wav"),
            &cancel,
        );
        assert!(result.is_err());
    }
}
