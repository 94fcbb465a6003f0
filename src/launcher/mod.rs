//! Target process lifecycle
//!
//! `start` hands out a [`Target`] owning the child process and its three
//! pipes; `Target::stop` is the paired release. Every successful `start` must
//! be followed by exactly one `stop` on every exit path. `stop` is idempotent
//! and `Drop` fires a best-effort kill if it was never called.

mod container;
mod process;

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::rpc::MessageChannel;

pub use container::{start_detached, Container, ContainerSpec, ExecOutput, Runtime};

/// Bound on waiting for the process after a forced kill
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Bound on draining stderr once the process is gone
const STDERR_DRAIN: Duration = Duration::from_millis(500);

/// Most recent stderr bytes kept for diagnostics
const STDERR_CAPACITY: usize = 64 * 1024;

/// What to launch
#[derive(Debug, Clone)]
pub enum LaunchSpec {
    /// Bare process
    Process(ProcessSpec),
    /// Container run with attached stdio
    Container(ContainerSpec),
}

impl LaunchSpec {
    /// Short human-readable description
    pub fn label(&self) -> String {
        match self {
            LaunchSpec::Process(p) => p.label(),
            LaunchSpec::Container(c) => format!("{} (via {})", c.image, c.runtime),
        }
    }
}

/// Bare process launch parameters
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Applied in order, later entries win
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn label(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Start the target described by `spec`
///
/// Container targets are only returned once the runtime reports them running.
pub async fn start(spec: &LaunchSpec) -> Result<Target> {
    match spec {
        LaunchSpec::Process(p) => process::spawn(p),
        LaunchSpec::Container(c) => container::start_attached(c).await,
    }
}

/// How a `stop` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// `stop` had already run
    AlreadyStopped,
    /// Target had exited on its own
    Exited,
    /// Target honoured the termination request within the grace period
    Terminated,
    /// Forced kill was needed
    Killed,
    /// Forced kill was sent but the target could not be reaped in time
    Abandoned,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopOutcome::AlreadyStopped => "already stopped",
            StopOutcome::Exited => "already exited",
            StopOutcome::Terminated => "terminated",
            StopOutcome::Killed => "killed after grace period",
            StopOutcome::Abandoned => "kill sent, not reaped",
        };
        f.write_str(text)
    }
}

/// Shared tail of the target's stderr
#[derive(Clone, Default)]
struct StderrCapture(Arc<Mutex<Vec<u8>>>);

impl StderrCapture {
    fn push(&self, bytes: &[u8]) {
        if let Ok(mut buf) = self.0.lock() {
            buf.extend_from_slice(bytes);
            if buf.len() > STDERR_CAPACITY {
                let excess = buf.len() - STDERR_CAPACITY;
                buf.drain(..excess);
            }
        }
    }

    fn snapshot(&self) -> String {
        self.0
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }
}

/// A running target, exclusively owned by one test run
pub struct Target {
    child: Child,
    label: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: StderrCapture,
    stderr_task: Option<JoinHandle<()>>,
    /// Attached container backing this process, if any
    container: Option<(Runtime, String)>,
    stopped: bool,
}

impl Target {
    /// Wrap a freshly spawned child with all three pipes
    fn from_child(mut child: Child, label: String) -> Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Launch("Failed to get target stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Launch("Failed to get target stdout".to_string()))?;

        let stderr = StderrCapture::default();
        let stderr_task = child.stderr.take().map(|mut pipe| {
            let capture = stderr.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match pipe.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => capture.push(&buf[..n]),
                    }
                }
            })
        });

        tracing::info!(pid = ?child.id(), name = %label, "Target started");

        Ok(Self {
            child,
            label,
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr,
            stderr_task,
            container: None,
            stopped: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id, `None` once reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take the stdin/stdout pair as a message channel (once)
    pub fn channel(&mut self) -> Result<MessageChannel> {
        match (self.stdout.take(), self.stdin.take()) {
            (Some(stdout), Some(stdin)) => Ok(MessageChannel::new(stdout, stdin)),
            _ => Err(Error::Launch(
                "Target stdio has already been taken".to_string(),
            )),
        }
    }

    /// Whether the process has not exited yet
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Everything captured from stderr so far (most recent 64KB)
    pub fn stderr_output(&self) -> String {
        self.stderr.snapshot()
    }

    /// Terminate, wait up to `grace`, then force-kill
    ///
    /// Never fails: problems are logged and the next escalation is tried.
    pub async fn stop(&mut self, grace: Duration) -> StopOutcome {
        if self.stopped {
            return StopOutcome::AlreadyStopped;
        }
        self.stopped = true;

        // EOF on stdin is the politest hint there is
        self.stdin.take();

        let outcome = match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(name = %self.label, %status, "Target had already exited");
                StopOutcome::Exited
            }
            _ => self.terminate_then_kill(grace).await,
        };

        if let Some((runtime, name)) = &self.container {
            runtime.remove_if_running(name).await;
        }

        if let Some(task) = self.stderr_task.take() {
            drain_stderr(task, STDERR_DRAIN).await;
        }

        tracing::info!(name = %self.label, outcome = %outcome, "Target stopped");
        outcome
    }

    async fn terminate_then_kill(&mut self, grace: Duration) -> StopOutcome {
        match self.request_termination() {
            Ok(()) => match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(name = %self.label, %status, "Target terminated");
                    return StopOutcome::Terminated;
                }
                Ok(Err(e)) => tracing::warn!(name = %self.label, "Waiting for target failed: {}", e),
                Err(_) => tracing::warn!(
                    name = %self.label,
                    "Target ignored termination for {:?}, killing",
                    grace
                ),
            },
            Err(e) => tracing::warn!(name = %self.label, "{}", e),
        }

        if let Err(e) = self.child.start_kill() {
            tracing::warn!(name = %self.label, "Forced kill failed: {}", e);
        }

        match tokio::time::timeout(KILL_WAIT, self.child.wait()).await {
            Ok(Ok(_)) => StopOutcome::Killed,
            _ => {
                tracing::warn!(name = %self.label, "Target not reaped after forced kill");
                StopOutcome::Abandoned
            }
        }
    }

    #[cfg(unix)]
    fn request_termination(&self) -> Result<()> {
        let pid = self
            .child
            .id()
            .ok_or_else(|| Error::Cleanup("process already reaped".to_string()))?;

        // SAFETY: sending a signal has no memory-safety preconditions
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(Error::Cleanup(format!(
                "SIGTERM to {} failed: {}",
                pid,
                std::io::Error::last_os_error()
            )))
        }
    }

    #[cfg(not(unix))]
    fn request_termination(&self) -> Result<()> {
        Err(Error::Cleanup(
            "no graceful termination signal on this platform".to_string(),
        ))
    }
}

/// Let the stderr reader finish for up to `bound`, then abort it
///
/// A grandchild that inherited the pipe can keep it open long after the
/// target itself is gone.
async fn drain_stderr(mut task: JoinHandle<()>, bound: Duration) {
    if tokio::time::timeout(bound, &mut task).await.is_err() {
        tracing::debug!("Stderr still open after {:?}, abandoning reader", bound);
        task.abort();
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        // Best-effort since we can't await in drop
        let _ = self.child.start_kill();
        if let Some((runtime, name)) = &self.container {
            runtime.kill_detached(name);
        }
    }
}
