//! Error types for the smoke-test harness
//!
//! Messages are meant to be read by whoever is debugging a misbehaving
//! server, so they say which side of the pipe went wrong.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Launch Errors ===
    #[error("Failed to launch target: {0}")]
    Launch(String),

    #[error("Target program '{name}' not found. Searched: {searched}")]
    TargetNotFound { name: String, searched: String },

    #[error("Target is not running: {0}")]
    NotRunning(String),

    // === Channel Errors ===
    #[error("Target closed the channel before replying")]
    ChannelClosed,

    #[error("Reply is not valid JSON: {0}")]
    Parse(String),

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    // === Cleanup Errors ===
    #[error("Graceful stop failed: {0}")]
    Cleanup(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a target not found error listing the PATH entries searched
    pub fn target_not_found(name: &str) -> Self {
        let searched = std::env::var_os("PATH")
            .map(|p| {
                std::env::split_paths(&p)
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_else(|| "$PATH is not set".to_string());

        Self::TargetNotFound {
            name: name.to_string(),
            searched,
        }
    }

    /// Whether the channel can no longer be trusted to stay in step with the
    /// target after this error
    pub fn desyncs_channel(&self) -> bool {
        matches!(self, Error::ChannelClosed | Error::Timeout(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_duration() {
        let msg = Error::Timeout(Duration::from_secs(10)).to_string();
        assert_eq!(msg, "No reply within 10s");
    }

    #[test]
    fn test_desync_classification() {
        assert!(Error::ChannelClosed.desyncs_channel());
        assert!(Error::Timeout(Duration::from_millis(5)).desyncs_channel());
        assert!(!Error::Parse("eof".into()).desyncs_channel());
    }
}
