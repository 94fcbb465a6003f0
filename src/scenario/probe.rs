//! One-shot container probe
//!
//! Starts a detached container, pipes a single serialized initialize request
//! into an auxiliary exec against it and shows whatever comes back. There is
//! no long-lived stream, so nothing is correlated; only a hung exec fails the
//! probe.

use colored::Colorize;

use crate::common::Error;
use crate::launcher::{start_detached, Container, ContainerSpec};
use crate::rpc::Request;

use super::{fatal_step, print_block, ScenarioSettings, TestResult};

const STEPS_TOTAL: usize = 2;

/// Characters shown per preview line
const PREVIEW_WIDTH: usize = 80;

/// Probe-specific settings
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Command run inside the container with the request on its stdin
    pub exec_command: Vec<String>,
    /// Log lines shown when the probe gets no answer
    pub log_tail: usize,
}

/// Run the probe against a detached container started from `spec`
pub async fn run_probe(
    name: &str,
    spec: &ContainerSpec,
    settings: &ScenarioSettings,
    probe: &ProbeSettings,
) -> TestResult {
    println!("\n{} {}", "Running Probe:".blue().bold(), name.white().bold());
    println!("  {} (via {})", spec.image.dimmed(), spec.runtime.dimmed());

    let mut container = match start_detached(spec).await {
        Ok(container) => container,
        Err(e) => {
            fatal_step("Step 1", &e);
            return TestResult::failed(name, 1, STEPS_TOTAL, e.to_string()).finish();
        }
    };
    println!("  {} Step 1: container {} started", "✓".green(), container.short_id());
    println!("    status: {}", container.status().dimmed());

    let outcome = exec_initialize(&container, settings, probe).await;

    let stop = container.stop(settings.grace).await;
    println!("\n  {} Container {}", "■".dimmed(), stop);

    TestResult {
        name: name.to_string(),
        passed: outcome.is_ok(),
        steps_run: STEPS_TOTAL,
        steps_total: STEPS_TOTAL,
        error: outcome.err().map(|e| e.to_string()),
        initialize: None,
        tools: None,
        resources: None,
        stop: Some(stop),
        stderr: String::new(),
    }
    .finish()
}

/// Step 2: feed the initialize request through the exec and report
async fn exec_initialize(
    container: &Container,
    settings: &ScenarioSettings,
    probe: &ProbeSettings,
) -> Result<(), Error> {
    let request = Request::initialize(1, settings.client.clone());
    let input = format!("{}\n", serde_json::to_string(&request)?);
    tracing::debug!("probe >>> {}", input.trim_end());

    match container
        .exec(&probe.exec_command, &input, settings.reply_timeout)
        .await
    {
        Ok(output) if output.success && !output.stdout.trim().is_empty() => {
            println!("  {} Step 2: probe answered", "✓".green());
            println!("    {}", "Response preview:".dimmed());
            for line in preview_lines(&output.stdout, 2) {
                println!("      {}", line);
            }
            Ok(())
        }
        Ok(output) => {
            println!(
                "  {} Step 2: probe got no answer (exit code {})",
                "!".yellow(),
                output.code.map(|c| c.to_string()).unwrap_or_else(|| "none".into())
            );
            print_block(&output.stderr);
            show_logs(container, probe.log_tail).await;
            Ok(())
        }
        Err(e @ Error::Timeout(_)) => {
            fatal_step("Step 2", &e);
            show_logs(container, probe.log_tail).await;
            Err(e)
        }
        Err(e) => {
            println!("  {} Step 2: {}", "!".yellow(), e);
            show_logs(container, probe.log_tail).await;
            Ok(())
        }
    }
}

async fn show_logs(container: &Container, tail: usize) {
    match container.logs(tail).await {
        Ok(logs) if !logs.trim().is_empty() => {
            println!("    {}", "Container logs:".dimmed());
            print_block(&logs);
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(container = container.id(), "Fetching logs failed: {}", e),
    }
}

/// First `count` non-empty lines, each cut to `PREVIEW_WIDTH` characters
fn preview_lines(text: &str, count: usize) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .take(count)
        .map(|line| match line.char_indices().nth(PREVIEW_WIDTH) {
            Some((idx, _)) => format!("{}...", &line[..idx]),
            None => line.to_string(),
        })
        .collect()
}
