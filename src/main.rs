//! mcp-smoke - smoke tests for JSON-RPC servers on stdio
//!
//! Launches a server (bare process or container), performs the initialize
//! handshake, lists tools and resources, and exits 0 only if every step
//! completed.

use std::path::PathBuf;

use clap::Parser;
use mcp_smoke::commands::Commands;
use mcp_smoke::common::{config::Config, logging};
use mcp_smoke::{cli, Result};

#[derive(Parser)]
#[command(name = "mcp-smoke", about = "Smoke-test a JSON-RPC server over stdio")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir/mcp-smoke/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging and raw replies in the trace
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_cli(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let result = cli::dispatch(cli.command, &config, cli.verbose).await?;
    Ok(result.exit_code())
}
