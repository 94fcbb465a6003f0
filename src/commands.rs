//! CLI command definitions
//!
//! Defines the clap commands for the smoke-test CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a program and run the stdio handshake against it
    Run {
        /// Program to launch (looked up on PATH when it has no directory part)
        program: String,

        /// Arguments to pass to the program
        #[arg(last = true)]
        args: Vec<String>,

        /// Working directory for the program
        #[arg(long)]
        cwd: Option<PathBuf>,

        #[command(flatten)]
        env: EnvArgs,

        #[command(flatten)]
        timeouts: TimeoutArgs,
    },

    /// Run an image with attached stdio and run the handshake against it
    Container {
        /// Image reference
        image: String,

        #[command(flatten)]
        env: EnvArgs,

        #[command(flatten)]
        runtime: RuntimeArgs,

        #[command(flatten)]
        timeouts: TimeoutArgs,
    },

    /// Start a detached container and send one initialize through an exec
    Probe {
        /// Image reference
        image: String,

        #[command(flatten)]
        env: EnvArgs,

        #[command(flatten)]
        runtime: RuntimeArgs,

        #[command(flatten)]
        timeouts: TimeoutArgs,
    },

    /// Run a target defined in the configuration file
    Target {
        /// Name under [targets] in config.toml
        name: String,

        #[command(flatten)]
        env: EnvArgs,

        #[command(flatten)]
        timeouts: TimeoutArgs,
    },
}

/// Environment overrides
#[derive(Args, Debug, Default)]
pub struct EnvArgs {
    /// Environment override KEY=VALUE (repeatable)
    #[arg(long = "env", short = 'e', value_name = "KEY=VALUE")]
    pub env: Vec<String>,
}

/// Container runtime selection
#[derive(Args, Debug, Default)]
pub struct RuntimeArgs {
    /// Container runtime CLI (default from config, usually docker)
    #[arg(long)]
    pub runtime: Option<String>,
}

/// Timeout overrides, in seconds
#[derive(Args, Debug, Default)]
pub struct TimeoutArgs {
    /// Seconds to wait for each reply
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Seconds to wait after the termination request before killing
    #[arg(long, value_name = "SECONDS")]
    pub grace: Option<f64>,
}
