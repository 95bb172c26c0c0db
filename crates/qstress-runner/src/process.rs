use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::artifact::Artifact;
use crate::error::ProcessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Exited { code: i32 },
    Signaled,
    TimedOut,
}

impl ProcessOutcome {
    pub fn success(self) -> bool {
        matches!(self, ProcessOutcome::Exited { code: 0 })
    }

    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => ProcessOutcome::Exited { code },
            None => ProcessOutcome::Signaled,
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Exited { code } => write!(f, "exited with code {}", code),
            ProcessOutcome::Signaled => f.write_str("was terminated by a signal"),
            ProcessOutcome::TimedOut => f.write_str("timed out"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunRequest<'a> {
    pub stdin: Option<&'a [u8]>,
    pub capture_stdout: bool,
    pub cwd: Option<&'a Path>,
}

impl<'a> RunRequest<'a> {
    pub fn captured() -> Self {
        Self {
            capture_stdout: true,
            ..Self::default()
        }
    }

    pub fn with_stdin(mut self, bytes: &'a [u8]) -> Self {
        self.stdin = Some(bytes);
        self
    }

    pub fn in_dir(mut self, cwd: &'a Path) -> Self {
        self.cwd = Some(cwd);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub outcome: ProcessOutcome,
    /// Empty unless the request captured stdout.
    pub stdout: Vec<u8>,
}

impl RunOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs compiled artifacts. The trial loop and replay only see this trait.
pub trait Executor {
    fn run(&self, artifact: Artifact, request: &RunRequest<'_>) -> Result<RunOutput, ProcessError>;
}

/// Spawns the binaries in `bin_dir` as child processes, killing any child
/// that outlives `timeout`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    bin_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(bin_dir: impl AsRef<Path>, timeout: Option<Duration>) -> Self {
        Self {
            bin_dir: bin_dir.as_ref().to_path_buf(),
            timeout,
        }
    }
}

impl Executor for ProcessRunner {
    fn run(&self, artifact: Artifact, request: &RunRequest<'_>) -> Result<RunOutput, ProcessError> {
        let program = artifact.binary_path(&self.bin_dir);
        if !program.exists() {
            return Err(ProcessError::MissingBinary {
                artifact,
                path: program,
            });
        }

        let mut cmd = Command::new(&program);
        if let Some(cwd) = request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(if request.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(if request.capture_stdout {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        cmd.stderr(Stdio::inherit());
        // Own group, so a timeout also reaches anything the child started.
        #[cfg(unix)]
        if self.timeout.is_some() {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|source| ProcessError::Spawn { artifact, source })?;

        if let (Some(mut pipe), Some(bytes)) = (child.stdin.take(), request.stdin) {
            let bytes = bytes.to_vec();
            // Not joined: the child may exit without draining stdin.
            thread::spawn(move || {
                let _ = pipe.write_all(&bytes);
            });
        }
        let (tx, rx) = mpsc::channel();
        match child.stdout.take() {
            Some(mut pipe) => {
                thread::spawn(move || {
                    let mut buf = Vec::new();
                    let _ = pipe.read_to_end(&mut buf);
                    let _ = tx.send(buf);
                });
            }
            None => drop(tx),
        }

        let outcome = wait_with_deadline(&mut child, self.timeout)
            .map_err(|source| ProcessError::Io { artifact, source })?;
        if outcome == ProcessOutcome::TimedOut {
            tracing::warn!(%artifact, timeout_ms = ?self.timeout.map(|t| t.as_millis()), "killed child after timeout");
        }

        // A descendant that inherited stdout keeps the pipe open after the
        // child is gone; stop waiting for EOF once the deadline has passed.
        let stdout = match self.timeout {
            None => rx.recv().unwrap_or_default(),
            Some(timeout) => {
                let budget = timeout.saturating_sub(started.elapsed()) + DRAIN_GRACE;
                match rx.recv_timeout(budget) {
                    Ok(buf) => buf,
                    Err(mpsc::RecvTimeoutError::Disconnected) => Vec::new(),
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        tracing::warn!(%artifact, "stdout still held open after deadline; killing process group");
                        kill_process_group(child.id());
                        Vec::new()
                    }
                }
            }
        };

        Ok(RunOutput { outcome, stdout })
    }
}

/// How long to keep draining stdout past the deadline before giving up on it.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let _ = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{}", pgid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<ProcessOutcome> {
    let Some(timeout) = timeout else {
        return child.wait().map(ProcessOutcome::from_status);
    };
    let start = Instant::now();
    let mut pause = Duration::from_millis(1);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(ProcessOutcome::from_status(status));
        }
        if start.elapsed() >= timeout {
            kill_process_group(child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Ok(ProcessOutcome::TimedOut);
        }
        thread::sleep(pause);
        pause = (pause * 2).min(Duration::from_millis(25));
    }
}
