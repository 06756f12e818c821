pub mod transcript;

pub use transcript::{
    merge_tracks, Segment, TaggedTrack, Transcript, TranscriptValidationError, Word,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User-visible transcription unit. Identity is an opaque UUID and never
/// changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub title: Option<String>,
    pub source: JobSource,
    pub is_multi_track: bool,
    pub parameters: Parameters,
    pub status: JobStatus,
    pub transcript: Option<Transcript>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub diarization: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Clears the result of a previous run so the job can re-enter
    /// `pending` with a clean slate. Called by the Scheduler on re-enqueue
    /// of a `completed`/`failed`/`uploaded` job, never by callers directly.
    pub(crate) fn reset_for_rerun(&mut self) {
        self.transcript = None;
        self.summary = None;
        self.error_message = None;
    }
}

/// Where a job's input media comes from. A collaborator (upload handler,
/// CSV ingest, etc.) is responsible for populating artifacts on disk before
/// the row reaches `uploaded`; the core only ever reads these paths back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    SingleTrack { path: String },
    MultiTrack { tracks: Vec<TrackFile> },
    RemoteUrl { url: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// True for the statuses `EnqueueJob` is allowed to start from (§4.6).
    pub fn enqueueable(self) -> bool {
        matches!(
            self,
            JobStatus::Uploaded | JobStatus::Completed | JobStatus::Failed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One audio input participating in a multi-track job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackFile {
    pub path: String,
    pub display_name: String,
    pub track_index: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Whisper,
    NvidiaParakeet,
    NvidiaCanary,
    Openai,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Cuda,
    Auto,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Transcribe,
    Translate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiarizeModel {
    Pyannote,
    NvidiaSortformer,
}

/// Engine-configuration record carried on the job and echoed, as a
/// snapshot, into the Execution that processes it. All fields have
/// explicit defaults so a job created with an empty parameters document is
/// still well-formed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub model_family: ModelFamily,
    pub model: String,
    pub device: Device,
    pub device_index: u32,
    pub compute_type: String,
    pub threads: u32,
    pub batch_size: u32,
    pub task: Task,
    pub language: Option<String>,
    pub output_format: String,
    pub no_align: bool,
    pub interpolate_method: String,
    pub return_char_alignments: bool,
    pub vad_method: String,
    pub vad_onset: f64,
    pub vad_offset: f64,
    pub chunk_size: u32,
    pub diarize: bool,
    pub diarize_model: DiarizeModel,
    pub min_speakers: Option<u32>,
    pub max_speakers: Option<u32>,
    pub hf_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub temperature: f64,
    pub best_of: u32,
    pub beam_size: u32,
    pub patience: f64,
    pub length_penalty: f64,
    pub suppress_numerals: bool,
    pub condition_on_previous_text: bool,
    pub fp16: bool,
    pub temperature_increment_on_fallback: f64,
    pub compression_ratio_threshold: f64,
    pub logprob_threshold: f64,
    pub no_speech_threshold: f64,
    pub is_multi_track_enabled: bool,
    pub attention_context_left: i32,
    pub attention_context_right: i32,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            model_family: ModelFamily::Whisper,
            model: "small".to_string(),
            device: Device::Auto,
            device_index: 0,
            compute_type: "float16".to_string(),
            threads: 4,
            batch_size: 8,
            task: Task::Transcribe,
            language: None,
            output_format: "json".to_string(),
            no_align: false,
            interpolate_method: "nearest".to_string(),
            return_char_alignments: false,
            vad_method: "pyannote".to_string(),
            vad_onset: 0.5,
            vad_offset: 0.363,
            chunk_size: 30,
            diarize: false,
            diarize_model: DiarizeModel::Pyannote,
            min_speakers: None,
            max_speakers: None,
            hf_token: None,
            openai_api_key: None,
            temperature: 0.0,
            best_of: 5,
            beam_size: 5,
            patience: 1.0,
            length_penalty: 1.0,
            suppress_numerals: false,
            condition_on_previous_text: true,
            fp16: true,
            temperature_increment_on_fallback: 0.2,
            compression_ratio_threshold: 2.4,
            logprob_threshold: -1.0,
            no_speech_threshold: 0.6,
            is_multi_track_enabled: false,
            attention_context_left: -1,
            attention_context_right: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Processing,
    Completed,
    Failed,
}

/// Per-track timing recorded by the Multi-Track Coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackTiming {
    pub track_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Timing for the post-transcription audio merge step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeTimings {
    pub merge_start_time: DateTime<Utc>,
    pub merge_end_time: DateTime<Utc>,
    pub merge_duration_ms: u64,
    pub merged_audio_path: String,
}

/// One attempt to transcribe a job. Immutable once `status` is terminal,
/// except for idempotent replays of the same terminal write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_duration_ms: Option<u64>,
    pub actual_parameters: Parameters,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub multi_track_timings: Option<Vec<TrackTiming>>,
    pub merge_timings: Option<MergeTimings>,
}

impl Execution {
    pub fn new(job_id: Uuid, actual_parameters: Parameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            started_at: Utc::now(),
            completed_at: None,
            processing_duration_ms: None,
            actual_parameters,
            status: ExecutionStatus::Processing,
            error_message: None,
            multi_track_timings: None,
            merge_timings: None,
        }
    }

    pub fn finish(&mut self, status: ExecutionStatus, error_message: Option<String>) {
        let completed_at = Utc::now();
        self.processing_duration_ms = Some(
            (completed_at - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.completed_at = Some(completed_at);
        self.status = status;
        self.error_message = error_message;
    }
}
