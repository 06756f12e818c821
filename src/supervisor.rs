use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag a caller flips to request cancellation of an in-flight run.
/// Cheap to clone and to poll; this is the propagation path described in
/// §4.3/§5: cancellation is cooperative, the Supervisor turns it into a
/// signal plus a bounded-grace kill.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("process cancelled")]
    Cancelled,
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;

/// Process Supervisor (§4.3): one external process, one lifetime.
/// Streams stdout/stderr line-buffered to the caller's sinks, and turns a
/// cancellation request into a graceful signal followed by a force-kill of
/// the whole process group if the grace period elapses.
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Runs `spec` to completion (or until cancelled). `on_stdout`/
    /// `on_stderr` are called once per captured line, in arrival order;
    /// they are expected to tee into the job's log and any progress
    /// parser. Returns the process exit code, or `SupervisorError::Cancelled`
    /// if cancellation won the race and the process had to be killed.
    pub fn run(
        &self,
        spec: CommandSpec,
        cancel: &CancelHandle,
        graceful_kill_timeout: Duration,
        mut on_stdout: impl FnMut(String),
        mut on_stderr: impl FnMut(String),
    ) -> Result<i32, SupervisorError> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).envs(&spec.env);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        new_process_group(&mut command);

        let mut child = command.spawn()?;
        let stdout_handle = spawn_line_pump(child.stdout.take());
        let stderr_handle = spawn_line_pump(child.stderr.take());

        let outcome = poll_until_exit_or_cancel(&mut child, cancel);

        // On cancellation the child must be killed before joining the pump
        // threads: they block in `reader.lines()` until the pipes see EOF,
        // which only happens once the child exits. Killing first guarantees
        // the joins below unblock within the grace period instead of
        // waiting on a child that was never signalled to die.
        if let ProcessOutcome::Cancelled = outcome {
            kill_process_group(&mut child, graceful_kill_timeout);
        }

        for line in stdout_handle.join().unwrap_or_default() {
            on_stdout(line);
        }
        let stderr_lines = stderr_handle.join().unwrap_or_default();
        let mut captured = 0usize;
        for line in stderr_lines {
            if captured < STDERR_CAPTURE_LIMIT {
                captured += line.len();
                on_stderr(line);
            }
        }

        match outcome {
            ProcessOutcome::Exited(status) => Ok(status.code().unwrap_or(-1)),
            ProcessOutcome::Cancelled => Err(SupervisorError::Cancelled),
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

enum ProcessOutcome {
    Exited(std::process::ExitStatus),
    Cancelled,
}

fn poll_until_exit_or_cancel(child: &mut Child, cancel: &CancelHandle) -> ProcessOutcome {
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return ProcessOutcome::Exited(status);
        }
        if cancel.is_cancelled() {
            return ProcessOutcome::Cancelled;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_line_pump<R>(stream: Option<R>) -> std::thread::JoinHandle<Vec<String>>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let Some(stream) = stream else {
            return Vec::new();
        };
        use std::io::BufRead as _;
        let reader = std::io::BufReader::new(stream);
        reader.lines().map_while(Result::ok).collect()
    })
}

#[cfg(unix)]
fn new_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        command.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn new_process_group(_command: &mut Command) {
    // No portable process-group primitive in std on non-Unix targets; the
    // supervisor falls back to killing the direct child only (see
    // SPEC_FULL.md §4.3 and DESIGN.md for this platform limitation).
}

/// Two-phase cancel: graceful signal to the whole process group, then a
/// bounded grace period, then a force kill if the group is still alive.
#[cfg(unix)]
fn kill_process_group(child: &mut Child, graceful_kill_timeout: Duration) {
    let pid = child.id() as i32;
    unsafe {
        libc::kill(-pid, libc::SIGTERM);
    }

    let deadline = Instant::now() + graceful_kill_timeout;
    while Instant::now() < deadline {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child, graceful_kill_timeout: Duration) {
    let _ = graceful_kill_timeout;
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout_lines_and_exit_code() {
        let supervisor = ProcessSupervisor::new();
        let spec = CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "echo one; echo two".into()],
            env: HashMap::new(),
            cwd: None,
        };
        let mut lines = Vec::new();
        let code = supervisor
            .run(spec, &CancelHandle::new(), Duration::from_secs(5), |l| lines.push(l), |_| {})
            .unwrap();
        assert_eq!(code, 0);
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn run_reports_non_zero_exit() {
        let supervisor = ProcessSupervisor::new();
        let spec = CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 7".into()],
            env: HashMap::new(),
            cwd: None,
        };
        let code = supervisor
            .run(spec, &CancelHandle::new(), Duration::from_secs(5), |_| {}, |_| {})
            .unwrap();
        assert_eq!(code, 7);
    }

    #[test]
    fn run_honors_cancellation() {
        let supervisor = ProcessSupervisor::new();
        let cancel = CancelHandle::new();
        let spec = CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "sleep 30".into()],
            env: HashMap::new(),
            cwd: None,
        };

        let cancel_clone = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel_clone.cancel();
        });

        let result = supervisor.run(
            spec,
            &cancel,
            Duration::from_secs(1),
            |_| {},
            |_| {},
        );
        canceller.join().unwrap();
        assert!(matches!(result, Err(SupervisorError::Cancelled)));
    }
}
