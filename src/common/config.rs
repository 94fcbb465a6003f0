//! Configuration file handling

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Identity announced in `initialize`
    #[serde(default)]
    pub client: ClientConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Container runtime settings
    #[serde(default)]
    pub container: ContainerConfig,

    /// Settings applied to every target
    #[serde(default)]
    pub defaults: Defaults,

    /// Named launch targets
    #[serde(default)]
    pub targets: HashMap<String, TargetConfig>,
}

/// Client identity sent as `clientInfo`
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_client_name")]
    pub name: String,

    #[serde(default = "default_client_version")]
    pub version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
        }
    }
}

fn default_client_name() -> String {
    "mcp-smoke".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Bound on waiting for each reply line
    #[serde(default = "default_reply")]
    pub reply_secs: f64,

    /// Time allowed after the termination request before a forced kill
    #[serde(default = "default_grace")]
    pub grace_secs: f64,

    /// Container settling delay before the first status poll
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    /// Bound on container status polling
    #[serde(default = "default_ready")]
    pub ready_secs: f64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            reply_secs: default_reply(),
            grace_secs: default_grace(),
            settle_ms: default_settle(),
            ready_secs: default_ready(),
        }
    }
}

fn default_reply() -> f64 {
    10.0
}
fn default_grace() -> f64 {
    5.0
}
fn default_settle() -> u64 {
    3000
}
fn default_ready() -> f64 {
    10.0
}

impl Timeouts {
    pub fn reply(&self) -> Result<Duration> {
        secs("reply_secs", self.reply_secs)
    }

    pub fn grace(&self) -> Result<Duration> {
        secs("grace_secs", self.grace_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn ready(&self) -> Result<Duration> {
        secs("ready_secs", self.ready_secs)
    }

    /// Check every seconds value converts to a duration
    pub fn validate(&self) -> Result<()> {
        self.reply()?;
        self.grace()?;
        self.ready()?;
        Ok(())
    }
}

/// Negative, NaN, infinite or overflowing values are rejected
fn secs(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        Error::Config(format!(
            "Invalid {}: {} (expected a non-negative number of seconds)",
            name, value
        ))
    })
}

/// Container runtime configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ContainerConfig {
    /// Runtime CLI (docker, podman, ...)
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Number of log lines shown when a probe fails
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,

    /// Auxiliary command run inside the container for the one-shot probe
    #[serde(default = "default_exec_command")]
    pub exec_command: Vec<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            log_tail: default_log_tail(),
            exec_command: default_exec_command(),
        }
    }
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_log_tail() -> usize {
    5
}

fn default_exec_command() -> Vec<String> {
    vec!["cat".to_string()]
}

/// Default settings
#[derive(Debug, Deserialize, Default)]
pub struct Defaults {
    /// Environment overrides applied before per-target and CLI overrides
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A named target from the configuration file
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetConfig {
    /// Bare process speaking over its own stdio
    Process {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Container image run with attached stdio
    Container {
        image: String,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.timeouts.validate()?;
        Ok(config)
    }

    /// Get a named target
    pub fn get_target(&self, name: &str) -> Result<&TargetConfig> {
        self.targets.get(name).ok_or_else(|| {
            let mut known: Vec<&str> = self.targets.keys().map(String::as_str).collect();
            known.sort_unstable();
            Error::Config(format!(
                "Unknown target '{}'. Configured targets: [{}]",
                name,
                known.join(", ")
            ))
        })
    }
}
