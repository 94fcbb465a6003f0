//! Persistent-pipe scenario
//!
//! initialize -> notifications/initialized -> tools/list -> resources/list,
//! one request in flight at a time, against a freshly started target.

use colored::Colorize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::common::Result;
use crate::launcher::{self, LaunchSpec};
use crate::rpc::{extract_descriptors, reply_error, Descriptor, MessageChannel, Notification, Request};

use super::{fatal_step, print_block, ScenarioSettings, TestResult};

/// Number of steps in the fixed script
pub const STEPS_TOTAL: usize = 4;

/// What the script observed, filled in as steps complete
#[derive(Debug, Default)]
pub struct Transcript {
    /// Steps attempted so far (the last one may have failed)
    pub steps_run: usize,
    pub initialize: Option<Value>,
    pub tools: Option<Vec<Descriptor>>,
    pub resources: Option<Vec<Descriptor>>,
    /// Soft failures that did not abort the run
    pub warnings: Vec<String>,
}

/// Correlation ids: 1, 2, 3, ... never reused
#[derive(Debug)]
struct IdSequence(i64);

impl Default for IdSequence {
    fn default() -> Self {
        Self(1)
    }
}

impl IdSequence {
    fn next(&mut self) -> i64 {
        let id = self.0;
        self.0 += 1;
        id
    }
}

/// Run the scenario against a target launched from `spec`
///
/// Never returns early without stopping the target; every failure ends up
/// in the returned result.
pub async fn run_scenario(name: &str, spec: &LaunchSpec, settings: &ScenarioSettings) -> TestResult {
    println!("\n{} {}", "Running Test:".blue().bold(), name.white().bold());
    println!("  {}", spec.label().dimmed());

    let mut target = match launcher::start(spec).await {
        Ok(target) => target,
        Err(e) => {
            fatal_step("Launch", &e);
            return TestResult::failed(name, 0, STEPS_TOTAL, e.to_string()).finish();
        }
    };
    println!(
        "  {} Target started (pid {})",
        "✓".green(),
        target.pid().map(|p| p.to_string()).unwrap_or_else(|| "?".into())
    );

    println!("\n{}", "Steps:".cyan());
    let mut transcript = Transcript::default();
    let outcome = match target.channel() {
        // channel is dropped at the end of this arm, closing stdin before stop
        Ok(mut channel) => drive(&mut channel, settings, &mut transcript).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &outcome {
        fatal_step(&format!("Step {}", transcript.steps_run), e);
    }

    let stop = target.stop(settings.grace).await;
    println!("\n  {} Target {}", "■".dimmed(), stop);

    let stderr = target.stderr_output();
    let result = TestResult {
        name: name.to_string(),
        passed: outcome.is_ok() && transcript.warnings.is_empty(),
        steps_run: transcript.steps_run,
        steps_total: STEPS_TOTAL,
        error: outcome
            .err()
            .map(|e| e.to_string())
            .or_else(|| transcript.warnings.first().cloned()),
        initialize: transcript.initialize,
        tools: transcript.tools,
        resources: transcript.resources,
        stop: Some(stop),
        stderr,
    };

    if !result.passed && !result.stderr.trim().is_empty() {
        println!("\n{}", "Server stderr:".yellow());
        print_block(&result.stderr);
    }

    result.finish()
}

/// The fixed request script over an already-open channel
///
/// Returns at the first fatal step error; `transcript` holds everything
/// observed up to that point.
pub async fn drive<R, W>(
    channel: &mut MessageChannel<R, W>,
    settings: &ScenarioSettings,
    transcript: &mut Transcript,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut ids = IdSequence::default();

    // Step 1: initialize. Any parsed JSON counts as an answer.
    transcript.steps_run = 1;
    let request = Request::initialize(ids.next(), settings.client.clone());
    channel.send(&request).await?;
    match channel.receive(settings.reply_timeout).await {
        Ok(reply) => {
            println!("  {} Step 1: initialize", "✓".green());
            if settings.verbose {
                println!("    {}", reply.to_string().dimmed());
            }
            if !reply.is_object() {
                soft_failure(transcript, 1, format!("initialize reply is not an object: {}", reply));
            }
            transcript.initialize = Some(reply);
        }
        // A line was consumed, so the channel is still in step
        Err(e) if !e.desyncs_channel() => soft_failure(transcript, 1, format!("initialize: {}", e)),
        Err(e) => return Err(e),
    }

    // Step 2: initialized notification, nothing to read back
    transcript.steps_run = 2;
    channel.send(&Notification::initialized()).await?;
    println!("  {} Step 2: notifications/initialized", "✓".green());

    // Step 3: tools/list
    transcript.steps_run = 3;
    let tools = list(channel, settings, Request::list_tools(ids.next()), "tools").await?;
    println!("  {} Step 3: tools/list", "✓".green());
    print_descriptors("tools", &tools);
    transcript.tools = Some(tools);

    // Step 4: resources/list
    transcript.steps_run = 4;
    let resources = list(channel, settings, Request::list_resources(ids.next()), "resources").await?;
    println!("  {} Step 4: resources/list", "✓".green());
    print_descriptors("resources", &resources);
    transcript.resources = Some(resources);

    Ok(())
}

/// Send a listing request and pull `result.<key>` out of the reply
async fn list<R, W>(
    channel: &mut MessageChannel<R, W>,
    settings: &ScenarioSettings,
    request: Request,
    key: &str,
) -> Result<Vec<Descriptor>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    channel.send(&request).await?;
    let reply = channel.receive(settings.reply_timeout).await?;

    if let Some(error) = reply_error(&reply) {
        tracing::warn!(method = %request.method, "Reply carries an error member: {}", error);
    }
    if settings.verbose {
        println!("    {}", reply.to_string().dimmed());
    }

    Ok(extract_descriptors(&reply, key))
}

fn soft_failure(transcript: &mut Transcript, step: usize, message: String) {
    println!("  {} Step {}: {}", "!".yellow(), step, message);
    tracing::warn!(step, "{}", message);
    transcript.warnings.push(message);
}

fn print_descriptors(kind: &str, descriptors: &[Descriptor]) {
    println!("    {}", format!("{} available: {}", kind, descriptors.len()).bold());
    for d in descriptors {
        println!("    - {}: {}", d.display_name(), d.display_description().dimmed());
    }
}
