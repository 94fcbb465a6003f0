//! Common utilities shared by the launcher, channel and scenario driver

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Parse a `KEY=VALUE` environment override
pub fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(Error::Config(format!(
            "Invalid environment override '{}': expected KEY=VALUE",
            pair
        ))),
    }
}
