//! Stand-in for the external `whisperx` engine binary the `whisper`
//! adapter shells out to (see `src/engine/whisper.rs`). Integration tests
//! put this binary on `PATH` under the name `whisperx` so the full
//! Scheduler → Runner → Supervisor → adapter pipeline can be exercised
//! against a real subprocess without a GPU or a real ASR model.
//!
//! Controlled entirely through environment variables so tests never need
//! to touch argv parsing beyond finding `--output_dir`:
//! - `MOCK_ENGINE_EXIT_CODE`: exit code to return (default `0`).
//! - `MOCK_ENGINE_SLEEP_MS`: sleep this long before doing anything else,
//!   so a test can cancel mid-flight (default `0`).
//! - `MOCK_ENGINE_EMIT_PROGRESS`: when `1`, print a couple of
//!   `phase=... fraction=...` lines to stdout first (default `1`).

use std::io::Write as _;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let output_dir = args
        .iter()
        .position(|a| a == "--output_dir")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| ".".to_string());

    let sleep_ms: u64 = std::env::var("MOCK_ENGINE_SLEEP_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if sleep_ms > 0 {
        std::thread::sleep(std::time::Duration::from_millis(sleep_ms));
    }

    let emit_progress = std::env::var("MOCK_ENGINE_EMIT_PROGRESS").unwrap_or_else(|_| "1".into());
    if emit_progress == "1" {
        println!("phase=load fraction=0.1");
        println!("phase=asr fraction=0.6");
        println!("phase=align fraction=0.9");
        std::io::stdout().flush().ok();
    }

    let exit_code: i32 = std::env::var("MOCK_ENGINE_EXIT_CODE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if exit_code != 0 {
        eprintln!("mock_whisperx: simulated engine failure");
        std::process::exit(exit_code);
    }

    let result = format!(
        r#"{{"language":"en","segments":[{{"start":0.0,"end":1.2,"text":"hello world","words":[{{"start":0.0,"end":0.5,"word":"hello"}},{{"start":0.5,"end":1.2,"word":"world"}}]}}],"text":"hello world"}}"#
    );
    let path = std::path::Path::new(&output_dir).join("result.json");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create output_dir");
    }
    std::fs::write(&path, result).expect("write result.json");
}
