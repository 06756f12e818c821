//! Process entry point. The library crate (`orchestrator_core`) never
//! installs a subscriber or reads the environment on its own — this binary
//! is where those ambient concerns live: load configuration, wire up
//! `tracing-subscriber`, boot the Orchestrator (which runs the
//! crash-recovery scan and starts the worker pool), then keep the process
//! alive until asked to shut down.
//!
//! HTTP surfaces, job submission, and the embedded UI are out of this
//! crate's scope (see spec.md §1); this binary exists to host the
//! orchestration engine for whichever collaborator process calls into it
//! in a full deployment.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use orchestrator_core::{Config, Orchestrator};
use tracing_subscriber::EnvFilter;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn handle_shutdown_signal(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_shutdown_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_shutdown_signal as usize);
        libc::signal(libc::SIGTERM, handle_shutdown_signal as usize);
    }
}

#[cfg(not(unix))]
fn install_shutdown_signal_handlers() {
    // No portable signal primitive in std; non-Unix hosts rely on the
    // process supervisor (service manager / container runtime) to send a
    // kill that simply terminates the process, same limitation noted for
    // process-group cancellation in supervisor.rs.
}

fn config_path() -> PathBuf {
    std::env::var("ORCHESTRATOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./orchestrator.toml"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load(&config_path()).context("failed to load orchestrator configuration")?;
    tracing::info!(
        workers = config.workers,
        upload_dir = %config.upload_dir.display(),
        transcripts_dir = %config.transcripts_dir.display(),
        "starting transcription orchestration engine"
    );

    let orchestrator = Orchestrator::new(&config).context("failed to start orchestrator")?;
    install_shutdown_signal_handlers();

    while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    tracing::info!("shutdown requested, draining in-flight runs");
    orchestrator.shutdown();
    tracing::info!("shutdown complete");
    Ok(())
}
