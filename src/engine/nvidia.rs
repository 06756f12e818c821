use std::collections::HashMap;
use std::path::Path;

use crate::domain::{Device, Parameters};

use super::{push_device_args, push_diarize_args, push_task_args, EngineAdapter, Invocation};

#[derive(Clone, Copy, PartialEq, Eq)]
enum NvidiaFamily {
    Parakeet,
    Canary,
}

/// `nvidia_parakeet` / `nvidia_canary` adapter. Both families share a
/// command-line toolchain (NeMo) and only differ in the default `--model`
/// and the presence of attention-context windowing flags specific to these
/// streaming-capable architectures.
pub struct NvidiaAdapter {
    family: NvidiaFamily,
}

impl NvidiaAdapter {
    pub fn parakeet() -> Self {
        Self {
            family: NvidiaFamily::Parakeet,
        }
    }

    pub fn canary() -> Self {
        Self {
            family: NvidiaFamily::Canary,
        }
    }
}

impl EngineAdapter for NvidiaAdapter {
    fn build(&self, params: &Parameters, input_path: &Path, work_dir: &Path) -> Invocation {
        let mut args = vec![input_path.to_string_lossy().into_owned()];
        args.push("--model".into());
        args.push(params.model.clone());

        // NeMo defaults to GPU unless the caller explicitly asked for CPU.
        let mut effective = params.clone();
        if matches!(params.device, Device::Auto) {
            effective.device = Device::Cuda;
        }
        push_device_args(&mut args, &effective);
        push_task_args(&mut args, params);
        push_diarize_args(&mut args, params);

        args.push("--attention_context_left".into());
        args.push(params.attention_context_left.to_string());
        args.push("--attention_context_right".into());
        args.push(params.attention_context_right.to_string());

        args.push("--output_dir".into());
        args.push(work_dir.to_string_lossy().into_owned());

        let mut env = HashMap::new();
        if let Some(token) = &params.hf_token {
            env.insert("HF_TOKEN".to_string(), token.clone());
        }
        env.insert(
            "NEMO_MODEL_FAMILY".to_string(),
            match self.family {
                NvidiaFamily::Parakeet => "parakeet".to_string(),
                NvidiaFamily::Canary => "canary".to_string(),
            },
        );

        Invocation {
            program: "nemo_transcribe".to_string(),
            args,
            env,
        }
    }
}
