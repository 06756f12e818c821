//! Engine Adapters (§4.4, SPEC_FULL.md §4.4): one capability surface,
//! `build`/`parse_result`, implemented once per `model_family`. The
//! Scheduler and Runner never branch on the engine; adapter selection is a
//! pure function of `Parameters::model_family`.
mod nvidia;
mod openai;
mod whisper;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::{ModelFamily, Parameters, Transcript, TranscriptValidationError};

pub use nvidia::NvidiaAdapter;
pub use openai::OpenAiAdapter;
pub use whisper::WhisperAdapter;

/// argv/env the Supervisor should launch. The adapter never spawns the
/// process itself; it only describes how to.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine produced no result file at {0}")]
    MissingResult(PathBuf),
    #[error("engine result is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("engine result failed validation: {0}")]
    Invalid(#[from] TranscriptValidationError),
    #[error("io error reading engine result: {0}")]
    Io(#[from] std::io::Error),
}

/// The capability surface from §4.4: `Build(params, input, work_dir)` and
/// `ParseResult(work_dir)`. All four adapters share one parser entry point
/// (`default_parse_result`) for the canonical transcript shape; only argv
/// construction differs per engine.
pub trait EngineAdapter: Send + Sync {
    fn build(&self, params: &Parameters, input_path: &Path, work_dir: &Path) -> Invocation;

    fn parse_result(&self, work_dir: &Path) -> Result<Transcript, EngineError> {
        default_parse_result(work_dir)
    }
}

/// Every adapter's engine process is contracted (§6.1) to write a single
/// JSON result file into its working directory; this is the one place that
/// reads and validates it.
fn default_parse_result(work_dir: &Path) -> Result<Transcript, EngineError> {
    let path = work_dir.join("result.json");
    if !path.is_file() {
        return Err(EngineError::MissingResult(path));
    }
    let bytes = std::fs::read(&path)?;
    let transcript: Transcript = serde_json::from_slice(&bytes)?;
    transcript.validate()?;
    Ok(transcript)
}

/// Adapter selection is a pure function of `model_family` (§9).
pub fn select_adapter(model_family: ModelFamily) -> Box<dyn EngineAdapter> {
    match model_family {
        ModelFamily::Whisper => Box::new(WhisperAdapter),
        ModelFamily::NvidiaParakeet => Box::new(NvidiaAdapter::parakeet()),
        ModelFamily::NvidiaCanary => Box::new(NvidiaAdapter::canary()),
        ModelFamily::Openai => Box::new(OpenAiAdapter),
    }
}

/// Shared argv fragments every local-binary adapter (whisper, nvidia)
/// builds the same way: device selection and the decoding knobs common to
/// both families' underlying CTranslate2/NeMo toolchains.
pub(crate) fn push_device_args(args: &mut Vec<String>, params: &Parameters) {
    args.push("--device".into());
    args.push(device_arg(params.device).into());
    args.push("--device_index".into());
    args.push(params.device_index.to_string());
    args.push("--compute_type".into());
    args.push(params.compute_type.clone());
    args.push("--threads".into());
    args.push(params.threads.to_string());
    args.push("--batch_size".into());
    args.push(params.batch_size.to_string());
}

pub(crate) fn push_task_args(args: &mut Vec<String>, params: &Parameters) {
    args.push("--task".into());
    args.push(task_arg(params.task).into());
    if let Some(language) = &params.language {
        args.push("--language".into());
        args.push(language.clone());
    }
    args.push("--output_format".into());
    args.push(params.output_format.clone());
}

pub(crate) fn push_diarize_args(args: &mut Vec<String>, params: &Parameters) {
    if !params.diarize {
        return;
    }
    args.push("--diarize".into());
    args.push("--diarize_model".into());
    args.push(diarize_model_arg(params.diarize_model).into());
    if let Some(min) = params.min_speakers {
        args.push("--min_speakers".into());
        args.push(min.to_string());
    }
    if let Some(max) = params.max_speakers {
        args.push("--max_speakers".into());
        args.push(max.to_string());
    }
}

fn device_arg(device: crate::domain::Device) -> &'static str {
    match device {
        crate::domain::Device::Cpu => "cpu",
        crate::domain::Device::Cuda => "cuda",
        crate::domain::Device::Auto => "auto",
    }
}

fn task_arg(task: crate::domain::Task) -> &'static str {
    match task {
        crate::domain::Task::Transcribe => "transcribe",
        crate::domain::Task::Translate => "translate",
    }
}

fn diarize_model_arg(model: crate::domain::DiarizeModel) -> &'static str {
    match model {
        crate::domain::DiarizeModel::Pyannote => "pyannote",
        crate::domain::DiarizeModel::NvidiaSortformer => "nvidia_sortformer",
    }
}
