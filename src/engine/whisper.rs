use std::collections::HashMap;
use std::path::Path;

use crate::domain::Parameters;

use super::{push_device_args, push_diarize_args, push_task_args, EngineAdapter, Invocation};

/// `whisper` / whisperX-family adapter. Argv mirrors the common whisperX
/// CLI surface: model + task + alignment + VAD + decoding flags.
pub struct WhisperAdapter;

impl EngineAdapter for WhisperAdapter {
    fn build(&self, params: &Parameters, input_path: &Path, work_dir: &Path) -> Invocation {
        let mut args = vec![input_path.to_string_lossy().into_owned()];
        args.push("--model".into());
        args.push(params.model.clone());
        push_device_args(&mut args, params);
        push_task_args(&mut args, params);

        if params.no_align {
            args.push("--no_align".into());
        } else {
            args.push("--interpolate_method".into());
            args.push(params.interpolate_method.clone());
            if params.return_char_alignments {
                args.push("--return_char_alignments".into());
            }
        }

        args.push("--vad_method".into());
        args.push(params.vad_method.clone());
        args.push("--vad_onset".into());
        args.push(params.vad_onset.to_string());
        args.push("--vad_offset".into());
        args.push(params.vad_offset.to_string());
        args.push("--chunk_size".into());
        args.push(params.chunk_size.to_string());

        push_diarize_args(&mut args, params);

        args.push("--temperature".into());
        args.push(params.temperature.to_string());
        args.push("--best_of".into());
        args.push(params.best_of.to_string());
        args.push("--beam_size".into());
        args.push(params.beam_size.to_string());
        args.push("--patience".into());
        args.push(params.patience.to_string());
        args.push("--length_penalty".into());
        args.push(params.length_penalty.to_string());
        if params.suppress_numerals {
            args.push("--suppress_numerals".into());
        }
        if params.condition_on_previous_text {
            args.push("--condition_on_previous_text".into());
        }
        if params.fp16 {
            args.push("--fp16".into());
        }
        args.push("--temperature_increment_on_fallback".into());
        args.push(params.temperature_increment_on_fallback.to_string());
        args.push("--compression_ratio_threshold".into());
        args.push(params.compression_ratio_threshold.to_string());
        args.push("--logprob_threshold".into());
        args.push(params.logprob_threshold.to_string());
        args.push("--no_speech_threshold".into());
        args.push(params.no_speech_threshold.to_string());

        args.push("--output_dir".into());
        args.push(work_dir.to_string_lossy().into_owned());

        let mut env = HashMap::new();
        if let Some(token) = &params.hf_token {
            env.insert("HF_TOKEN".to_string(), token.clone());
        }

        Invocation {
            program: "whisperx".to_string(),
            args,
            env,
        }
    }
}
