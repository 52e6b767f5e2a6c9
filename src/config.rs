//! Server configuration
//!
//! Every field has a default, so an empty TOML file (or no file at all)
//! yields a working configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default bind address
pub const DEFAULT_ADDR: &str = "127.0.0.1:65000";

fn default_bind() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_max_username_length() -> usize {
    32
}

fn default_max_name_attempts() -> usize {
    3
}

fn default_max_line_length() -> usize {
    4096
}

fn default_outbound_queue() -> usize {
    64
}

fn default_send_timeout_ms() -> u64 {
    2_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

/// Chat server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen address, e.g. "0.0.0.0:65000"
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Longest accepted username, in characters
    #[serde(default = "default_max_username_length")]
    pub max_username_length: usize,
    /// Username claims allowed before the connection is dropped
    #[serde(default = "default_max_name_attempts")]
    pub max_name_attempts: usize,
    /// Longest accepted input line, in bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Lines buffered per connection before senders wait
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// How long a sender waits on a full outbound queue
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// How long shutdown waits for sessions before force-closing them
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_username_length: default_max_username_length(),
            max_name_attempts: default_max_name_attempts(),
            max_line_length: default_max_line_length(),
            outbound_queue: default_outbound_queue(),
            send_timeout_ms: default_send_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("max_username_length", self.max_username_length as u64),
            ("max_name_attempts", self.max_name_attempts as u64),
            ("max_line_length", self.max_line_length as u64),
            ("outbound_queue", self.outbound_queue as u64),
            ("send_timeout_ms", self.send_timeout_ms),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms),
        ];

        for (name, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
            }
        }

        if self.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("bind must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
