use std::collections::HashMap;
use std::path::Path;

use crate::domain::Parameters;

use super::{push_task_args, EngineAdapter, Invocation};

/// `openai` adapter: a thin wrapper around the OpenAI transcription API.
/// Unlike the local-binary adapters there is no device/compute-type
/// selection, no VAD, and no diarization knob; decoding options that don't
/// apply to a hosted model are simply not forwarded.
pub struct OpenAiAdapter;

impl EngineAdapter for OpenAiAdapter {
    fn build(&self, params: &Parameters, input_path: &Path, work_dir: &Path) -> Invocation {
        let mut args = vec![input_path.to_string_lossy().into_owned()];
        args.push("--model".into());
        args.push(params.model.clone());
        push_task_args(&mut args, params);

        args.push("--temperature".into());
        args.push(params.temperature.to_string());

        args.push("--output_dir".into());
        args.push(work_dir.to_string_lossy().into_owned());

        let mut env = HashMap::new();
        if let Some(key) = &params.openai_api_key {
            env.insert("OPENAI_API_KEY".to_string(), key.clone());
        }

        Invocation {
            program: "openai_transcribe".to_string(),
            args,
            env,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_omits_device_and_diarize_flags() {
        let adapter = OpenAiAdapter;
        let mut params = Parameters::default();
        params.diarize = true;
        let invocation = adapter.build(&params, Path::new("a.wav"), Path::new("/tmp/work"));
        assert!(!invocation.args.iter().any(|a| a == "--device"));
        assert!(!invocation.args.iter().any(|a| a == "--diarize"));
    }

    #[test]
    fn build_passes_api_key_through_env_not_args() {
        let adapter = OpenAiAdapter;
        let mut params = Parameters::default();
        params.openai_api_key = Some("sk-secret".to_string());
        let invocation = adapter.build(&params, Path::new("a.wav"), Path::new("/tmp/work"));
        assert_eq!(
            invocation.env.get("OPENAI_API_KEY"),
            Some(&"sk-secret".to_string())
        );
        assert!(!invocation.args.iter().any(|a| a == "sk-secret"));
    }
}
