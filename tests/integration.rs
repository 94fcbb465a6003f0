//! End-to-end tests for the smoke-test harness
//!
//! These tests drive the `mock_server` fixture binary:
//! 1. through the library (`run_scenario`, `launcher::start` / `stop`)
//! 2. through the `mcp-smoke` binary, checking the trace and exit code
//! 3. (unix) through a fake container runtime script standing in for docker

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use mcp_smoke::launcher::{self, ContainerSpec, LaunchSpec, ProcessSpec, StopOutcome};
use mcp_smoke::rpc::{Implementation, Request};
use mcp_smoke::scenario::{self, ProbeSettings, ScenarioSettings};
use mcp_smoke::Error;

/// Test context with an isolated config file
struct TestContext {
    /// Keeps the temporary directory alive for the test
    temp_dir: tempfile::TempDir,
    /// Config file passed with --config
    config_path: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        Self::with_config("")
    }

    fn with_config(content: &str) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, content).expect("Failed to write config");
        Self {
            temp_dir,
            config_path,
        }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Run the mcp-smoke binary with this context's config
    fn run_smoke(&self, args: &[&str]) -> SmokeOutput {
        let output = Command::new(env!("CARGO_BIN_EXE_mcp-smoke"))
            .arg("--config")
            .arg(&self.config_path)
            .args(args)
            .env("NO_COLOR", "1")
            .output()
            .expect("Failed to run mcp-smoke");

        SmokeOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code(),
        }
    }

    /// Write a docker stand-in; `ps_running` controls the status query and
    /// `exec_body` is the shell run for `exec`
    #[cfg(unix)]
    fn fake_runtime(&self, ps_running: bool, exec_body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let ps = if ps_running {
            "echo \"Up 1 second\""
        } else {
            "exit 0"
        };
        let script = format!(
            r#"#!/bin/sh
case "$1" in
  run)
    for arg in "$@"; do
      if [ "$arg" = "--detach" ]; then echo "0123456789abcdef0123"; exit 0; fi
    done
    exec "{mock}" ;;
  ps) {ps} ;;
  exec) {exec_body} ;;
  logs) echo "server booted"; echo "listening on stdio" ;;
  *) exit 0 ;;
esac
"#,
            mock = mock_server(),
            ps = ps,
            exec_body = exec_body,
        );

        let path = self.path().join("fake-docker");
        fs::write(&path, script).expect("Failed to write fake runtime");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod fake runtime");
        path.to_string_lossy().into_owned()
    }
}

/// Output from an mcp-smoke run
#[derive(Debug)]
struct SmokeOutput {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

impl SmokeOutput {
    fn assert_code(&self, expected: i32) {
        assert_eq!(
            self.code,
            Some(expected),
            "unexpected exit code\nstdout: {}\nstderr: {}",
            self.stdout,
            self.stderr
        );
    }
}

fn mock_server() -> String {
    env!("CARGO_BIN_EXE_mock_server").to_string()
}

fn mock_spec(args: &[&str]) -> LaunchSpec {
    let mut spec = ProcessSpec::new(mock_server());
    spec.args = args.iter().map(|a| a.to_string()).collect();
    LaunchSpec::Process(spec)
}

fn settings() -> ScenarioSettings {
    ScenarioSettings {
        reply_timeout: Duration::from_secs(5),
        grace: Duration::from_secs(2),
        client: Implementation {
            name: "integration-test".into(),
            version: "0.0.0".into(),
        },
        verbose: false,
    }
}

// ============== Binary: persistent pipe ==============

#[test]
fn test_echo_stub_passes_end_to_end() {
    let ctx = TestContext::new();
    let output = ctx.run_smoke(&["run", &mock_server()]);

    output.assert_code(0);
    assert!(output.stdout.contains("tools available: 0"), "{}", output.stdout);
    assert!(output.stdout.contains("resources available: 0"), "{}", output.stdout);
    assert!(output.stdout.contains("Test Passed"), "{}", output.stdout);
}

#[test]
fn test_listing_counts_are_reported() {
    let ctx = TestContext::new();
    let output = ctx.run_smoke(&[
        "run",
        &mock_server(),
        "--",
        "--tools",
        "3",
        "--resources",
        "2",
    ]);

    output.assert_code(0);
    assert!(output.stdout.contains("tools available: 3"), "{}", output.stdout);
    assert!(output.stdout.contains("- tool-2: Mock tool 2"), "{}", output.stdout);
    assert!(output.stdout.contains("resources available: 2"), "{}", output.stdout);
    assert!(
        output.stdout.contains("- resource-1: No description"),
        "{}",
        output.stdout
    );
}

#[test]
fn test_silent_target_times_out_with_nonzero_exit() {
    let ctx = TestContext::new();
    let start = Instant::now();
    let output = ctx.run_smoke(&[
        "run",
        "--timeout",
        "0.5",
        "--grace",
        "1",
        &mock_server(),
        "--",
        "--silent",
    ]);

    output.assert_code(1);
    assert!(output.stdout.contains("No reply within"), "{}", output.stdout);
    assert!(output.stdout.contains("Test Failed"), "{}", output.stdout);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_early_exit_fails_and_shows_stderr() {
    let ctx = TestContext::new();
    let output = ctx.run_smoke(&[
        "run",
        &mock_server(),
        "--",
        "--exit-after",
        "0",
        "--stderr",
        "fatal: missing AWS credentials",
    ]);

    output.assert_code(1);
    assert!(output.stdout.contains("closed the channel"), "{}", output.stdout);
    assert!(output.stdout.contains("Server stderr"), "{}", output.stdout);
    assert!(output.stdout.contains("missing AWS credentials"), "{}", output.stdout);
}

#[test]
fn test_out_of_range_timeout_is_rejected() {
    let ctx = TestContext::new();
    let output = ctx.run_smoke(&["run", "--timeout", "1e30", &mock_server()]);

    output.assert_code(1);
    assert!(output.stderr.contains("Invalid reply_secs"), "{}", output.stderr);
    assert!(!output.stdout.contains("Running Test"), "{}", output.stdout);
}

#[test]
fn test_missing_program_exit_code() {
    let ctx = TestContext::new();
    let output = ctx.run_smoke(&["run", "mcp-smoke-no-such-server"]);

    output.assert_code(1);
    assert!(output.stdout.contains("not found"), "{}", output.stdout);
}

#[test]
fn test_named_target_from_config() {
    let ctx = TestContext::with_config(&format!(
        r#"
[targets.mock]
kind = "process"
program = "{}"
args = ["--tools", "1"]
"#,
        mock_server()
    ));
    let output = ctx.run_smoke(&["target", "mock"]);

    output.assert_code(0);
    assert!(output.stdout.contains("tools available: 1"), "{}", output.stdout);
}

#[test]
fn test_unknown_target_is_an_error() {
    let ctx = TestContext::new();
    let output = ctx.run_smoke(&["target", "nope"]);

    output.assert_code(1);
    assert!(output.stderr.contains("Unknown target 'nope'"), "{}", output.stderr);
}

// ============== Library: scenario ==============

#[tokio::test]
async fn test_scenario_tool_count_round_trip() {
    let result = scenario::run_scenario("count", &mock_spec(&["--tools", "5"]), &settings()).await;

    assert!(result.passed, "{:?}", result.error);
    assert_eq!(result.steps_run, result.steps_total);
    assert_eq!(result.tools.as_ref().map(Vec::len), Some(5));
    assert_eq!(result.resources.as_ref().map(Vec::len), Some(0));
    assert!(result.initialize.as_ref().is_some_and(|v| v.is_object()));
    assert!(matches!(
        result.stop,
        Some(StopOutcome::Exited) | Some(StopOutcome::Terminated)
    ));
}

#[tokio::test]
async fn test_scenario_target_exits_before_reply() {
    for args in [&["--exit-after", "0"][..], &["--exit-immediately"][..]] {
        let result = scenario::run_scenario("early-exit", &mock_spec(args), &settings()).await;

        assert!(!result.passed);
        assert_eq!(result.steps_run, 1);
        let error = result.error.unwrap_or_default();
        assert!(error.contains("closed the channel"), "{:?}: {}", args, error);
        assert!(result.stop.is_some(), "cleanup must run");
    }
}

#[tokio::test]
async fn test_scenario_timeout_still_cleans_up() {
    let mut fast = settings();
    fast.reply_timeout = Duration::from_millis(300);

    let result = scenario::run_scenario("silent", &mock_spec(&["--silent"]), &fast).await;

    assert!(!result.passed);
    assert!(result.error.unwrap_or_default().contains("No reply within"));
    assert!(matches!(
        result.stop,
        Some(StopOutcome::Exited) | Some(StopOutcome::Terminated)
    ));
}

#[tokio::test]
async fn test_scenario_garbage_initialize_continues_but_fails() {
    let result =
        scenario::run_scenario("garbage", &mock_spec(&["--garbage-initialize"]), &settings()).await;

    assert!(!result.passed);
    assert_eq!(result.steps_run, result.steps_total);
    assert!(result.initialize.is_none());
    assert_eq!(result.tools.as_ref().map(Vec::len), Some(0));
    assert!(result.error.unwrap_or_default().contains("initialize"));
}

#[tokio::test]
async fn test_scenario_launch_failure() {
    let spec = LaunchSpec::Process(ProcessSpec::new("mcp-smoke-no-such-server"));
    let result = scenario::run_scenario("missing", &spec, &settings()).await;

    assert!(!result.passed);
    assert_eq!(result.steps_run, 0);
    assert!(result.stop.is_none());
}

// ============== Library: launcher ==============

#[tokio::test]
async fn test_start_missing_program() {
    let spec = LaunchSpec::Process(ProcessSpec::new("mcp-smoke-no-such-server"));
    match launcher::start(&spec).await {
        Err(Error::TargetNotFound { name, .. }) => assert_eq!(name, "mcp-smoke-no-such-server"),
        Err(other) => panic!("Expected TargetNotFound, got {:?}", other),
        Ok(_) => panic!("Expected launch to fail"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_start_non_executable_path() {
    let ctx = TestContext::new();
    let path = ctx.config_path.to_string_lossy().into_owned();
    let spec = LaunchSpec::Process(ProcessSpec::new(path.clone()));

    match launcher::start(&spec).await {
        Err(Error::Launch(msg)) => assert!(msg.contains(&path), "{}", msg),
        Err(other) => panic!("Expected Launch, got {:?}", other),
        Ok(_) => panic!("Expected launch to fail"),
    }

    let result = scenario::run_scenario("not-executable", &spec, &settings()).await;
    assert!(!result.passed);
    assert_eq!(result.steps_run, 0);
    assert!(result.stop.is_none());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mut target = launcher::start(&mock_spec(&[])).await.unwrap();
    assert!(target.is_running());

    let first = target.stop(Duration::from_secs(2)).await;
    assert!(matches!(first, StopOutcome::Exited | StopOutcome::Terminated));
    assert!(!target.is_running());

    let start = Instant::now();
    assert_eq!(target.stop(Duration::from_secs(2)).await, StopOutcome::AlreadyStopped);
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_stop_after_target_exited() {
    let mut target = launcher::start(&mock_spec(&["--exit-immediately"])).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while target.is_running() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(target.stop(Duration::from_secs(2)).await, StopOutcome::Exited);
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_escalates_to_kill() {
    let mut target = launcher::start(&mock_spec(&["--ignore-sigterm"])).await.unwrap();

    // One round trip guarantees the SIGTERM handler is installed
    {
        let mut channel = target.channel().unwrap();
        channel
            .send(&Request::list_tools(1))
            .await
            .unwrap();
        channel.receive(Duration::from_secs(5)).await.unwrap();
    }

    let start = Instant::now();
    let outcome = target.stop(Duration::from_millis(200)).await;

    assert_eq!(outcome, StopOutcome::Killed);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!target.is_running());
}

#[tokio::test]
async fn test_channel_can_only_be_taken_once() {
    let mut target = launcher::start(&mock_spec(&[])).await.unwrap();

    assert!(target.channel().is_ok());
    assert!(matches!(target.channel(), Err(Error::Launch(_))));

    target.stop(Duration::from_secs(2)).await;
}

// ============== Containers (fake runtime) ==============

#[cfg(unix)]
fn container_spec(runtime: String) -> ContainerSpec {
    let mut spec = ContainerSpec::new("example/mcp-server:latest");
    spec.runtime = runtime;
    spec.env = vec![("FASTMCP_LOG_LEVEL".into(), "ERROR".into())];
    spec.settle = Duration::ZERO;
    spec.ready_timeout = Duration::from_millis(500);
    spec
}

#[cfg(unix)]
fn probe_settings() -> ProbeSettings {
    ProbeSettings {
        exec_command: vec!["cat".into()],
        log_tail: 5,
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_attached_container_scenario() {
    let ctx = TestContext::new();
    let spec = container_spec(ctx.fake_runtime(true, "cat"));

    let result = scenario::run_scenario("container", &LaunchSpec::Container(spec), &settings()).await;

    assert!(result.passed, "{:?}", result.error);
    assert_eq!(result.tools.as_ref().map(Vec::len), Some(0));
    assert!(result.stop.is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn test_attached_container_not_running() {
    let ctx = TestContext::new();
    let spec = container_spec(ctx.fake_runtime(false, "cat"));

    match launcher::start(&LaunchSpec::Container(spec.clone())).await {
        Err(Error::NotRunning(_)) => {}
        Err(other) => panic!("Expected NotRunning, got {:?}", other),
        Ok(_) => panic!("Expected start to fail"),
    }

    let result = scenario::run_scenario("container", &LaunchSpec::Container(spec), &settings()).await;
    assert!(!result.passed);
    assert_eq!(result.steps_run, 0);
    assert!(result.error.unwrap_or_default().contains("not running"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_probe_echoes_through_exec() {
    let ctx = TestContext::new();
    let spec = container_spec(ctx.fake_runtime(true, "cat"));

    let container = launcher::start_detached(&spec).await.unwrap();
    assert_eq!(container.short_id(), "0123456789ab");
    assert_eq!(container.status(), "Up 1 second");

    let input = "{\"jsonrpc\":\"2.0\",\"id\":1}\n";
    let output = container
        .exec(&["cat".to_string()], input, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(output.success);
    assert_eq!(output.stdout, input);

    let logs = container.logs(5).await.unwrap();
    assert!(logs.contains("server booted"));

    let mut container = container;
    assert_eq!(container.stop(Duration::from_secs(1)).await, StopOutcome::Terminated);
    assert_eq!(container.stop(Duration::from_secs(1)).await, StopOutcome::AlreadyStopped);

    let result = scenario::run_probe("probe", &spec, &settings(), &probe_settings()).await;
    assert!(result.passed, "{:?}", result.error);
}

#[cfg(unix)]
#[tokio::test]
async fn test_probe_exec_failure_is_only_a_warning() {
    let ctx = TestContext::new();
    let spec = container_spec(ctx.fake_runtime(true, "echo 'exec failed' >&2; exit 1"));

    let result = scenario::run_probe("probe", &spec, &settings(), &probe_settings()).await;

    assert!(result.passed, "{:?}", result.error);
    assert_eq!(result.stop, Some(StopOutcome::Terminated));
}

#[cfg(unix)]
#[tokio::test]
async fn test_probe_hung_exec_fails() {
    let ctx = TestContext::new();
    let spec = container_spec(ctx.fake_runtime(true, "exec sleep 30"));

    let mut fast = settings();
    fast.reply_timeout = Duration::from_millis(300);

    let start = Instant::now();
    let result = scenario::run_probe("probe", &spec, &fast, &probe_settings()).await;

    assert!(!result.passed);
    assert!(result.error.unwrap_or_default().contains("No reply within"));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[cfg(unix)]
#[test]
fn test_probe_command_exit_code() {
    let ctx = TestContext::with_config("[timeouts]\nsettle_ms = 0\nready_secs = 1\n");
    let runtime = ctx.fake_runtime(true, "cat");

    let output = ctx.run_smoke(&["probe", "example/mcp-server:latest", "--runtime", &runtime]);

    output.assert_code(0);
    assert!(output.stdout.contains("probe answered"), "{}", output.stdout);
    assert!(output.stdout.contains("\"method\":\"initialize\""), "{}", output.stdout);
}

#[cfg(unix)]
#[test]
fn test_container_command_exit_code() {
    let ctx = TestContext::with_config("[timeouts]\nsettle_ms = 0\nready_secs = 1\n");
    let runtime = ctx.fake_runtime(true, "cat");

    let output = ctx.run_smoke(&[
        "container",
        "example/mcp-server:latest",
        "--runtime",
        &runtime,
        "--env",
        "FASTMCP_LOG_LEVEL=ERROR",
    ]);

    output.assert_code(0);
    assert!(output.stdout.contains("tools available: 0"), "{}", output.stdout);
}
