//! Smoke-test scenarios
//!
//! Two fixed scripts share one result type: the persistent-pipe handshake
//! and listing run ([`run_scenario`]) and the one-shot container exec probe
//! ([`run_probe`]). Both print a human-readable step trace to stdout and
//! always release the target before returning.

mod probe;
mod runner;

use std::time::Duration;

use colored::Colorize;
use serde_json::Value;

use crate::common::Error;
use crate::launcher::StopOutcome;
use crate::rpc::{Descriptor, Implementation};

pub use probe::{run_probe, ProbeSettings};
pub use runner::{drive, run_scenario, Transcript, STEPS_TOTAL};

/// Knobs shared by every scenario
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    /// Bound on each reply
    pub reply_timeout: Duration,
    /// Grace period for stop before the forced kill
    pub grace: Duration,
    /// Identity sent in `initialize`
    pub client: Implementation,
    /// Echo raw replies in the trace
    pub verbose: bool,
}

/// Result of a scenario run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
    /// Raw initialize reply, if one parsed
    pub initialize: Option<Value>,
    pub tools: Option<Vec<Descriptor>>,
    pub resources: Option<Vec<Descriptor>>,
    /// How the target was released; `None` if it never started
    pub stop: Option<StopOutcome>,
    /// Captured target stderr
    pub stderr: String,
}

impl TestResult {
    fn failed(name: &str, steps_run: usize, steps_total: usize, error: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            steps_run,
            steps_total,
            error: Some(error),
            initialize: None,
            tools: None,
            resources: None,
            stop: None,
            stderr: String::new(),
        }
    }

    /// Print the final verdict line
    fn finish(self) -> Self {
        if self.passed {
            println!("\n{} {}\n", "✓".green().bold(), "Test Passed".green().bold());
        } else {
            println!(
                "\n{} {} ({}/{} steps)\n",
                "✗".red().bold(),
                "Test Failed".red().bold(),
                self.steps_run,
                self.steps_total
            );
        }
        self
    }

    /// Process exit code for this result
    pub fn exit_code(&self) -> i32 {
        if self.passed {
            0
        } else {
            1
        }
    }
}

/// Report a step that ended the run, on the trace and in the log
fn fatal_step(step: &str, error: &Error) {
    println!("  {} {}: {}", "✗".red(), step, error);
    tracing::error!(step, "{}", error);
}

/// Print multi-line diagnostics indented under a heading
fn print_block(text: &str) {
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        println!("    {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Shared buffer usable as a tracing writer
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_fatal_step_is_logged_as_error() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            fatal_step("Step 3", &Error::Timeout(Duration::from_secs(10)));
        });

        let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("ERROR"), "{}", logged);
        assert!(logged.contains("Step 3"), "{}", logged);
        assert!(logged.contains("No reply within 10s"), "{}", logged);
    }

    #[test]
    fn test_exit_code() {
        let mut result = TestResult::failed("t", 1, 4, "boom".into());
        assert_eq!(result.exit_code(), 1);
        result.passed = true;
        assert_eq!(result.exit_code(), 0);
    }
}
