//! The single choke point for subprocess invocation.
//!
//! Every other component (chroot manager, build planner, mirror sync) runs
//! host or in-chroot commands through [`CommandRunner`] rather than calling
//! `tokio::process::Command` directly, so the log stream and sequence
//! numbering stay centralized.

use crate::mount::MountRegistry;
use crate::privilege::PrivilegeChannel;
use pmb_schema::{ChrootId, PmbError};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Where a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExecContext {
    /// Run directly on the host.
    Host,
    /// Run inside the named chroot as root.
    Chroot(ChrootId),
    /// Run inside the named chroot as the unprivileged build user.
    UserInChroot(ChrootId),
}

/// The source of a command's stdin.
#[derive(Debug, Clone)]
pub enum StdinSource {
    None,
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// What to do with a command's combined output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDisposition {
    /// Capture and return stdout/stderr to the caller.
    Return,
    /// Stream both into the command log, discarding from memory.
    StreamToLog,
    /// Stream to both the command log and the terminal.
    TeeToTerminal,
}

/// A builder describing one subprocess invocation.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub argv: Vec<String>,
    pub context: ExecContext,
    pub env: HashMap<String, String>,
    pub stdin: StdinSource,
    pub output: OutputDisposition,
    pub timeout: Duration,
    /// Whether a non-zero exit becomes an `Err`.
    pub check: bool,
    /// Whether this invocation must run as root via the privilege channel.
    pub as_root: bool,
}

impl RunSpec {
    /// Start building a host-context command with sensible defaults: a
    /// 10-minute timeout, captured output, and `check = true`.
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        RunSpec {
            argv: argv.into_iter().map(Into::into).collect(),
            context: ExecContext::Host,
            env: HashMap::new(),
            stdin: StdinSource::None,
            output: OutputDisposition::Return,
            timeout: Duration::from_secs(600),
            check: true,
            as_root: false,
        }
    }

    pub fn context(mut self, context: ExecContext) -> Self {
        self.context = context;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn as_root(mut self, as_root: bool) -> Self {
        self.as_root = as_root;
        self
    }

    pub fn output(mut self, output: OutputDisposition) -> Self {
        self.output = output;
        self
    }
}

/// The outcome of a completed invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub sequence: u64,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A single entry in the command log: resolved argv, context, exit code,
/// and the monotonic sequence number (total-ordering guarantee from §5).
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub argv: Vec<String>,
    pub context: ExecContext,
    pub exit_code: Option<i32>,
}

/// The choke point for all subprocess invocation.
#[derive(Debug)]
pub struct CommandRunner {
    sequence: AtomicU64,
    log: Mutex<Vec<LogEntry>>,
    privilege: Arc<PrivilegeChannel>,
    mounts: Arc<MountRegistry>,
    log_path: Option<PathBuf>,
    /// pid of every child currently in flight, keyed by sequence number, so
    /// an external caller (the SIGINT handler in `main`) can reach in and
    /// stop whatever is running without owning the `Child` itself.
    active: Mutex<HashMap<u64, u32>>,
}

impl CommandRunner {
    /// Build a runner with no on-disk log; every invocation is still kept
    /// in the in-memory [`log_snapshot`](Self::log_snapshot).
    pub fn new(privilege: Arc<PrivilegeChannel>, mounts: Arc<MountRegistry>) -> Self {
        CommandRunner {
            sequence: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
            privilege,
            mounts,
            log_path: None,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Build a runner that also appends each entry as a JSON line to
    /// `log_path`, independent of `tracing`'s output so the trail survives
    /// `--quiet` invocations.
    pub fn with_log_file(privilege: Arc<PrivilegeChannel>, mounts: Arc<MountRegistry>, log_path: PathBuf) -> Self {
        CommandRunner {
            sequence: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
            privilege,
            mounts,
            log_path: Some(log_path),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Send `SIGTERM` to every command currently in flight. Used by the
    /// SIGINT handler to start a graceful stop; does not wait for exit.
    pub async fn cancel_all(&self) {
        let pids: Vec<u32> = self.active.lock().await.values().copied().collect();
        for pid in pids {
            send_signal(pid, nix::sys::signal::Signal::SIGTERM);
        }
    }

    /// Send `SIGKILL` to every command still in flight. Used to escalate
    /// when a command ignores `SIGTERM` past the grace window.
    pub async fn kill_all(&self) {
        let pids: Vec<u32> = self.active.lock().await.values().copied().collect();
        for pid in pids {
            send_signal(pid, nix::sys::signal::Signal::SIGKILL);
        }
    }

    async fn append_log_line(&self, entry: &LogEntry) {
        let Some(path) = &self.log_path else { return };
        let Ok(line) = serde_json::to_string(entry) else { return };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path).await {
            let _ = file.write_all(line.as_bytes()).await;
            let _ = file.write_all(b"\n").await;
        }
    }

    /// A snapshot of the command log recorded so far, in sequence order.
    pub async fn log_snapshot(&self) -> Vec<LogEntry> {
        self.log.lock().await.clone()
    }

    /// Run a command per `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::SpawnFailed`] if the process cannot start,
    /// [`PmbError::Timeout`] if it exceeds `spec.timeout`,
    /// [`PmbError::NonZeroExit`] if it exits non-zero and `spec.check` is
    /// true, and [`PmbError::PrivilegeEscalationFailed`] if `spec.as_root`
    /// requires escalation that the privilege channel cannot perform.
    pub async fn run(&self, spec: RunSpec) -> Result<RunOutcome, PmbError> {
        if let ExecContext::Chroot(id) | ExecContext::UserInChroot(id) = &spec.context {
            self.mounts.require_live(id).await?;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let argv = self.resolve_argv(&spec)?;
        tracing::debug!(sequence, argv = %argv.join(" "), "spawning command");

        let started = LogEntry {
            sequence,
            argv: argv.clone(),
            context: spec.context.clone(),
            exit_code: None,
        };
        self.append_log_line(&started).await;
        self.log.lock().await.push(started);

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        command.envs(&spec.env);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| PmbError::SpawnFailed(e.to_string()))?;
        if let Some(pid) = child.id() {
            self.active.lock().await.insert(sequence, pid);
        }

        if let StdinSource::Bytes(bytes) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(bytes).await;
            }
        }

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let out_task = tokio::spawn(drain(stdout, sequence, "stdout", spec.output));
        let err_task = tokio::spawn(drain(stderr, sequence, "stderr", spec.output));

        let wait_result = tokio::time::timeout(spec.timeout, child.wait()).await;
        self.active.lock().await.remove(&sequence);

        let status = match wait_result {
            Ok(status) => status.map_err(|e| PmbError::SpawnFailed(e.to_string()))?,
            Err(_) => {
                self.terminate(&mut child).await;
                return Err(PmbError::Timeout {
                    argv,
                    elapsed_secs: spec.timeout.as_secs(),
                });
            }
        };

        let stdout = out_task.await.unwrap_or_default();
        let stderr = err_task.await.unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 {
            tracing::warn!(sequence, exit_code, "command exited non-zero");
        }

        let finished = {
            let mut log = self.log.lock().await;
            let entry = log.iter_mut().find(|e| e.sequence == sequence);
            entry.map(|entry| {
                entry.exit_code = Some(exit_code);
                entry.clone()
            })
        };
        if let Some(entry) = finished {
            self.append_log_line(&entry).await;
        }

        if exit_code != 0 && spec.check {
            let tail: Vec<String> = stderr.lines().rev().take(20).map(str::to_string).collect();
            return Err(PmbError::NonZeroExit {
                status: exit_code,
                argv,
                stderr_tail: tail.into_iter().rev().collect(),
            });
        }

        Ok(RunOutcome {
            sequence,
            exit_code,
            stdout,
            stderr,
        })
    }

    fn resolve_argv(&self, spec: &RunSpec) -> Result<Vec<String>, PmbError> {
        let mut argv = spec.argv.clone();
        if let ExecContext::Chroot(id) | ExecContext::UserInChroot(id) = &spec.context {
            let mut wrapped = vec!["chroot".to_string(), id.dir_name()];
            if matches!(spec.context, ExecContext::UserInChroot(_)) {
                wrapped.push("su".to_string());
                wrapped.push("pmos".to_string());
                wrapped.push("-c".to_string());
                wrapped.push(argv.join(" "));
            } else {
                wrapped.extend(argv);
            }
            argv = wrapped;
        }
        if spec.as_root {
            argv = self.privilege.wrap(argv, &spec.env)?;
        }
        Ok(argv)
    }

    async fn terminate(&self, child: &mut tokio::process::Child) {
        if let Some(pid) = child.id() {
            send_signal(pid, nix::sys::signal::Signal::SIGTERM);
            tokio::time::sleep(Duration::from_secs(5)).await;
            send_signal(pid, nix::sys::signal::Signal::SIGKILL);
        }
        let _ = child.wait().await;
    }
}

fn send_signal(pid: u32, signal: nix::sys::signal::Signal) {
    let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal);
}

/// Drain one output stream per `output`'s disposition: `Return` buffers
/// every line into the string handed back in [`RunOutcome`]; `StreamToLog`
/// and `TeeToTerminal` emit each line through `tracing` as it arrives
/// instead, so a long-running build doesn't hold its whole output in memory,
/// and `TeeToTerminal` additionally echoes it to the real stdout/stderr.
async fn drain<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    sequence: u64,
    stream: &'static str,
    output: OutputDisposition,
) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut out = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        match output {
            OutputDisposition::Return => {
                out.push_str(&line);
                out.push('\n');
            }
            OutputDisposition::StreamToLog => {
                tracing::info!(sequence, stream, "{line}");
            }
            OutputDisposition::TeeToTerminal => {
                tracing::info!(sequence, stream, "{line}");
                if stream == "stderr" {
                    eprintln!("{line}");
                } else {
                    println!("{line}");
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_trivial_host_command() {
        let privilege = Arc::new(PrivilegeChannel::for_test());
        let mounts = Arc::new(MountRegistry::new());
        let runner = CommandRunner::new(privilege, mounts);

        let outcome = runner.run(RunSpec::new(["true"])).await.unwrap();
        assert_eq!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_errors_when_check_is_true() {
        let privilege = Arc::new(PrivilegeChannel::for_test());
        let mounts = Arc::new(MountRegistry::new());
        let runner = CommandRunner::new(privilege, mounts);

        let err = runner.run(RunSpec::new(["false"])).await.unwrap_err();
        assert!(matches!(err, PmbError::NonZeroExit { status: 1, .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_allowed_when_check_is_false() {
        let privilege = Arc::new(PrivilegeChannel::for_test());
        let mounts = Arc::new(MountRegistry::new());
        let runner = CommandRunner::new(privilege, mounts);

        let outcome = runner.run(RunSpec::new(["false"]).check(false)).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
    }

    #[tokio::test]
    async fn sequence_numbers_are_monotonic() {
        let privilege = Arc::new(PrivilegeChannel::for_test());
        let mounts = Arc::new(MountRegistry::new());
        let runner = CommandRunner::new(privilege, mounts);

        let a = runner.run(RunSpec::new(["true"])).await.unwrap();
        let b = runner.run(RunSpec::new(["true"])).await.unwrap();
        assert!(b.sequence > a.sequence);
    }

    #[tokio::test]
    async fn log_file_gets_a_line_per_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("pmbootstrap.log");
        let privilege = Arc::new(PrivilegeChannel::for_test());
        let mounts = Arc::new(MountRegistry::new());
        let runner = CommandRunner::with_log_file(privilege, mounts, log_path.clone());

        runner.run(RunSpec::new(["true"])).await.unwrap();

        let contents = tokio::fs::read_to_string(&log_path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2, "one line when the command starts, one when it finishes");
        let finished: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(finished["exit_code"], 0);
    }

    #[tokio::test]
    async fn cancel_all_stops_a_long_running_command() {
        let privilege = Arc::new(PrivilegeChannel::for_test());
        let mounts = Arc::new(MountRegistry::new());
        let runner = Arc::new(CommandRunner::new(privilege, mounts));

        let run_runner = runner.clone();
        let handle = tokio::spawn(async move { run_runner.run(RunSpec::new(["sleep", "30"]).check(false)).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        runner.cancel_all().await;

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("command did not exit after SIGTERM")
            .unwrap()
            .unwrap();
        assert_ne!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn stream_to_log_returns_empty_output() {
        let privilege = Arc::new(PrivilegeChannel::for_test());
        let mounts = Arc::new(MountRegistry::new());
        let runner = CommandRunner::new(privilege, mounts);

        let outcome = runner
            .run(RunSpec::new(["echo", "hello"]).output(OutputDisposition::StreamToLog))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "", "StreamToLog must not buffer output in memory");
    }
}
