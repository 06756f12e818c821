//! Stand-in for the external audio-merge tool the Multi-Track Coordinator
//! shells out to after all per-track transcripts have been produced (see
//! `src/coordinator.rs::run_audio_merge`). Accepts any number of input
//! paths followed by `--output <path>` and just touches an empty file
//! there, so integration tests can exercise the merge step without a real
//! audio toolchain.

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let output = args
        .iter()
        .position(|a| a == "--output")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .expect("mock_audio_merge requires --output <path>");

    let path = std::path::Path::new(&output);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create merged audio parent dir");
    }
    std::fs::write(path, b"").expect("write merged audio placeholder");
}
