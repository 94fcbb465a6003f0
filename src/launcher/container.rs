//! Container-backed targets
//!
//! Everything goes through the runtime CLI (`docker` by default, anything
//! with the same verbs works):
//! - `run --rm --interactive` for attached or detached instances
//! - `ps --filter K=V --format {{.Status}}` as the readiness/status query
//! - `logs --tail N` for diagnostics
//! - `exec --interactive` for the one-shot probe
//! - `stop` / `kill` for cleanup

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::common::{Error, Result};

use super::{StopOutcome, Target};

/// Bound on any single runtime CLI invocation
const RUNTIME_CMD_TIMEOUT: Duration = Duration::from_secs(30);

/// First and largest delay between status polls
const POLL_INITIAL: Duration = Duration::from_millis(100);
const POLL_MAX: Duration = Duration::from_secs(2);

/// Grace used when a start attempt has to be rolled back
const ABORT_GRACE: Duration = Duration::from_secs(2);

/// Container launch parameters
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    /// Injected with `--env`, later entries win
    pub env: Vec<(String, String)>,
    /// Runtime CLI name or path
    pub runtime: String,
    /// Delay before the first status poll
    pub settle: Duration,
    /// Bound on status polling after the settle delay
    pub ready_timeout: Duration,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: Vec::new(),
            runtime: "docker".to_string(),
            settle: Duration::from_secs(3),
            ready_timeout: Duration::from_secs(10),
        }
    }

    /// Arguments for `RUNTIME run`
    ///
    /// Attached instances get a name so the status query can find them;
    /// detached ones are identified by the id the runtime prints.
    fn run_args(&self, name: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = vec!["run".into(), "--rm".into(), "--interactive".into()];
        match name {
            Some(name) => {
                args.push("--name".into());
                args.push(name.to_string());
            }
            None => args.push("--detach".into()),
        }
        for (key, value) in &self.env {
            args.push("--env".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.image.clone());
        args
    }
}

/// Handle on the runtime CLI
#[derive(Debug, Clone)]
pub struct Runtime {
    program: PathBuf,
}

impl Runtime {
    /// Resolve the runtime CLI through PATH
    pub fn resolve(name: &str) -> Result<Self> {
        let program = which::which(name).map_err(|_| Error::target_not_found(name))?;
        Ok(Self { program })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run a short-lived runtime command and capture its output
    async fn output(&self, args: &[String]) -> Result<Output> {
        let mut cmd = self.command();
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!("{} {}", self.program.display(), args.join(" "));

        tokio::time::timeout(RUNTIME_CMD_TIMEOUT, cmd.output())
            .await
            .map_err(|_| Error::Timeout(RUNTIME_CMD_TIMEOUT))?
            .map_err(Error::Io)
    }

    /// Status line of the running instance matching `filter` (`name=...`, `id=...`)
    pub async fn status(&self, filter: &str) -> Result<Option<String>> {
        let args = [
            "ps".to_string(),
            "--filter".to_string(),
            filter.to_string(),
            "--format".to_string(),
            "{{.Status}}".to_string(),
        ];
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(Error::NotRunning(format!(
                "status query failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(first_line(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Sleep `settle`, then poll the status query with backoff until it
    /// reports a running instance or `bound` elapses
    ///
    /// With `child`, also gives up as soon as that local process exits.
    async fn wait_running(
        &self,
        filter: &str,
        settle: Duration,
        bound: Duration,
        mut child: Option<&mut Child>,
    ) -> Result<String> {
        tokio::time::sleep(settle).await;

        let deadline = Instant::now() + bound;
        let mut delay = POLL_INITIAL;
        let mut last_problem = format!("no running container matches {}", filter);

        loop {
            if let Some(child) = child.as_deref_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(Error::NotRunning(format!(
                        "runtime client exited with {} before the container came up",
                        status
                    )));
                }
            }

            match self.status(filter).await {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => last_problem = e.to_string(),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::NotRunning(last_problem));
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(POLL_MAX);
        }
    }

    /// Recent combined output of a container
    pub async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let args = [
            "logs".to_string(),
            "--tail".to_string(),
            tail.to_string(),
            id.to_string(),
        ];
        let output = self.output(&args).await?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    /// Kill a container that is still listed after its client went away
    pub(super) async fn remove_if_running(&self, name: &str) {
        match self.status(&format!("name={}", name)).await {
            Ok(Some(_)) => {
                tracing::warn!(container = name, "Container outlived its client, killing");
                if let Err(e) = self.output(&["kill".to_string(), name.to_string()]).await {
                    tracing::warn!(container = name, "Container kill failed: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(container = name, "Status query after stop failed: {}", e),
        }
    }

    /// Fire-and-forget kill usable from `Drop`
    pub(super) fn kill_detached(&self, id: &str) {
        let _ = std::process::Command::new(&self.program)
            .args(["kill", id])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
    }
}

/// Start a container with stdio attached to the runtime client
pub(super) async fn start_attached(spec: &ContainerSpec) -> Result<Target> {
    let runtime = Runtime::resolve(&spec.runtime)?;
    let name = instance_name();

    let mut cmd = runtime.command();
    cmd.args(spec.run_args(Some(&name)))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = cmd.spawn().map_err(|e| {
        Error::Launch(format!("Failed to start {}: {}", runtime.program.display(), e))
    })?;

    let mut target = Target::from_child(child, format!("{} [{}]", spec.image, name))?;
    target.container = Some((runtime.clone(), name.clone()));

    let filter = format!("name={}", name);
    let ready = runtime
        .wait_running(&filter, spec.settle, spec.ready_timeout, Some(&mut target.child))
        .await;

    match ready {
        Ok(status) => {
            tracing::info!(container = %name, %status, "Container running");
            Ok(target)
        }
        Err(e) => {
            target.stop(ABORT_GRACE).await;
            Err(with_stderr(e, &target.stderr_output()))
        }
    }
}

/// A detached container, stopped through the runtime
pub struct Container {
    runtime: Runtime,
    id: String,
    status: String,
    stopped: bool,
}

/// Captured result of a one-shot exec
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Start a detached container and wait for it to be listed as running
pub async fn start_detached(spec: &ContainerSpec) -> Result<Container> {
    let runtime = Runtime::resolve(&spec.runtime)?;

    let output = runtime.output(&spec.run_args(None)).await.map_err(|e| match e {
        Error::Io(e) => Error::Launch(format!("Failed to start {}: {}", runtime.program.display(), e)),
        other => other,
    })?;

    if !output.status.success() {
        return Err(Error::Launch(format!(
            "{} run exited with {}: {}",
            spec.runtime,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let id = first_line(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| Error::Launch(format!("{} run printed no container id", spec.runtime)))?;

    tracing::info!(container = %id, image = %spec.image, "Container started");

    let mut container = Container {
        runtime,
        id,
        status: String::new(),
        stopped: false,
    };

    let filter = format!("id={}", container.id);
    match container
        .runtime
        .wait_running(&filter, spec.settle, spec.ready_timeout, None)
        .await
    {
        Ok(status) => {
            container.status = status;
            Ok(container)
        }
        Err(e) => {
            let logs = container.logs(10).await.unwrap_or_default();
            container.stop(ABORT_GRACE).await;
            Err(with_stderr(e, &logs))
        }
    }
}

impl Container {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// First 12 characters of the id, as the runtime CLIs display it
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(12) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    /// Status reported when the container was found running
    pub fn status(&self) -> &str {
        &self.status
    }

    pub async fn logs(&self, tail: usize) -> Result<String> {
        self.runtime.logs(&self.id, tail).await
    }

    /// Run `command` inside the container, feed it `input`, capture its output
    pub async fn exec(&self, command: &[String], input: &str, timeout: Duration) -> Result<ExecOutput> {
        let mut cmd = self.runtime.command();
        cmd.arg("exec")
            .arg("--interactive")
            .arg(&self.id)
            .args(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Launch(format!("Failed to run exec: {}", e)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Launch("Failed to get exec stdin".to_string()))?;

        let input = input.to_string();
        let run = async move {
            // exec may fail before reading anything; its stderr says why
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                tracing::debug!("Writing exec input failed: {}", e);
            }
            drop(stdin);
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| Error::Timeout(timeout))??;

        Ok(ExecOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// `RUNTIME stop`, escalating to `RUNTIME kill`; idempotent, never fails
    pub async fn stop(&mut self, grace: Duration) -> StopOutcome {
        if self.stopped {
            return StopOutcome::AlreadyStopped;
        }
        self.stopped = true;

        let args = [
            "stop".to_string(),
            "--time".to_string(),
            grace.as_secs().to_string(),
            self.id.clone(),
        ];
        match self.runtime.output(&args).await {
            Ok(output) if output.status.success() => {
                tracing::info!(container = %self.id, "Container stopped");
                return StopOutcome::Terminated;
            }
            Ok(output) => tracing::warn!(
                container = %self.id,
                "Container stop failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => tracing::warn!(container = %self.id, "Container stop failed: {}", e),
        }

        match self.runtime.output(&["kill".to_string(), self.id.clone()]).await {
            Ok(output) if output.status.success() => StopOutcome::Killed,
            _ => {
                tracing::warn!(container = %self.id, "Container kill failed, giving up");
                StopOutcome::Abandoned
            }
        }
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if !self.stopped {
            self.runtime.kill_detached(&self.id);
        }
    }
}

/// Unique enough per harness run
fn instance_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    format!("mcp-smoke-{}-{:08x}", std::process::id(), nanos)
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Append diagnostics to a NotRunning error
fn with_stderr(err: Error, diagnostics: &str) -> Error {
    let diagnostics = diagnostics.trim();
    match err {
        Error::NotRunning(msg) if !diagnostics.is_empty() => {
            Error::NotRunning(format!("{}\n{}", msg, diagnostics))
        }
        other => other,
    }
}
