//! mcp-smoke - a smoke-test harness for JSON-RPC servers on stdio
//!
//! This library launches a target (bare process or container), talks
//! newline-delimited JSON-RPC to it over its standard streams, and checks
//! that the handshake and listing requests get parseable replies.

pub mod cli;
pub mod commands;
pub mod common;
pub mod launcher;
pub mod rpc;
pub mod scenario;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use launcher::{LaunchSpec, ProcessSpec, StopOutcome, Target};
pub use scenario::{run_scenario, ScenarioSettings, TestResult};
