//! CLI command handling
//!
//! Turns parsed commands plus configuration into a launch spec and runs the
//! matching scenario.

use std::collections::BTreeMap;

use crate::commands::{Commands, EnvArgs, TimeoutArgs};
use crate::common::config::{Config, TargetConfig};
use crate::common::{parse_env_pair, Result};
use crate::launcher::{ContainerSpec, LaunchSpec, ProcessSpec};
use crate::rpc::Implementation;
use crate::scenario::{self, ProbeSettings, ScenarioSettings, TestResult};

/// Dispatch a CLI command
///
/// Errors are reserved for bad input (arguments, configuration); anything
/// that goes wrong with the target is reported in the returned result.
pub async fn dispatch(command: Commands, config: &Config, verbose: bool) -> Result<TestResult> {
    match command {
        Commands::Run {
            program,
            args,
            cwd,
            env,
            timeouts,
        } => {
            let spec = ProcessSpec {
                program,
                args,
                env: merge_env(config, &BTreeMap::new(), &env)?,
                cwd,
            };
            let settings = settings(config, &timeouts, verbose)?;
            let name = spec.label();
            Ok(scenario::run_scenario(&name, &LaunchSpec::Process(spec), &settings).await)
        }

        Commands::Container {
            image,
            env,
            runtime,
            timeouts,
        } => {
            let mut spec = container_spec(config, image, merge_env(config, &BTreeMap::new(), &env)?)?;
            if let Some(runtime) = runtime.runtime {
                spec.runtime = runtime;
            }
            let settings = settings(config, &timeouts, verbose)?;
            let name = spec.image.clone();
            Ok(scenario::run_scenario(&name, &LaunchSpec::Container(spec), &settings).await)
        }

        Commands::Probe {
            image,
            env,
            runtime,
            timeouts,
        } => {
            let mut spec = container_spec(config, image, merge_env(config, &BTreeMap::new(), &env)?)?;
            if let Some(runtime) = runtime.runtime {
                spec.runtime = runtime;
            }
            let settings = settings(config, &timeouts, verbose)?;
            let probe = ProbeSettings {
                exec_command: config.container.exec_command.clone(),
                log_tail: config.container.log_tail,
            };
            let name = spec.image.clone();
            Ok(scenario::run_probe(&name, &spec, &settings, &probe).await)
        }

        Commands::Target {
            name,
            env,
            timeouts,
        } => {
            let spec = match config.get_target(&name)? {
                TargetConfig::Process {
                    program,
                    args,
                    cwd,
                    env: target_env,
                } => LaunchSpec::Process(ProcessSpec {
                    program: program.clone(),
                    args: args.clone(),
                    env: merge_env(config, target_env, &env)?,
                    cwd: cwd.clone(),
                }),
                TargetConfig::Container {
                    image,
                    env: target_env,
                } => LaunchSpec::Container(container_spec(
                    config,
                    image.clone(),
                    merge_env(config, target_env, &env)?,
                )?),
            };
            let settings = settings(config, &timeouts, verbose)?;
            Ok(scenario::run_scenario(&name, &spec, &settings).await)
        }
    }
}

fn settings(config: &Config, timeouts: &TimeoutArgs, verbose: bool) -> Result<ScenarioSettings> {
    let mut t = config.timeouts.clone();
    if let Some(secs) = timeouts.timeout {
        t.reply_secs = secs;
    }
    if let Some(secs) = timeouts.grace {
        t.grace_secs = secs;
    }

    Ok(ScenarioSettings {
        reply_timeout: t.reply()?,
        grace: t.grace()?,
        client: Implementation {
            name: config.client.name.clone(),
            version: config.client.version.clone(),
        },
        verbose,
    })
}

fn container_spec(config: &Config, image: String, env: Vec<(String, String)>) -> Result<ContainerSpec> {
    Ok(ContainerSpec {
        image,
        env,
        runtime: config.container.runtime.clone(),
        settle: config.timeouts.settle(),
        ready_timeout: config.timeouts.ready()?,
    })
}

/// Config defaults, then per-target values, then command-line overrides
fn merge_env(
    config: &Config,
    target_env: &BTreeMap<String, String>,
    cli: &EnvArgs,
) -> Result<Vec<(String, String)>> {
    let mut merged: BTreeMap<String, String> = config.defaults.env.clone();
    merged.extend(target_env.iter().map(|(k, v)| (k.clone(), v.clone())));
    for pair in &cli.env {
        let (key, value) = parse_env_pair(pair)?;
        merged.insert(key, value);
    }
    Ok(merged.into_iter().collect())
}
