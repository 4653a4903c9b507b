// Configuration module - exporter settings
//
// Settings come from an optional JSON file; command-line flags override
// individual fields afterwards. Every field has a default, so the exporter
// runs with no configuration at all.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::cache::ThrottlePolicy;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings format: {0}")]
    InvalidSettings(#[from] serde_json::Error),

    #[error("invalid setting: {0}")]
    InvalidValue(String),
}

/// Exporter settings
///
/// # Example config file
/// ```json
/// {
///   "listen_address": "0.0.0.0:9092",
///   "sinfo_command": ["sinfo", "--json"],
///   "fetch_timeout_secs": 10,
///   "poll_limit_secs": 10,
///   "serve_stale_on_error": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExporterSettings {
    /// Address the scrape endpoint binds to
    pub listen_address: String,

    /// Command whose stdout is the node inventory JSON
    pub sinfo_command: Vec<String>,

    /// Read the node inventory from this file instead of running the command
    pub nodes_file: Option<PathBuf>,

    /// Upper bound on one run of the command, in seconds
    pub fetch_timeout_secs: u64,

    /// Minimum time between two fetches, in seconds
    pub poll_limit_secs: u64,

    /// Keep emitting the last good aggregates when a fetch fails. Failures
    /// are counted either way.
    pub serve_stale_on_error: bool,
}

impl Default for ExporterSettings {
    fn default() -> Self {
        ExporterSettings {
            listen_address: "0.0.0.0:9092".to_string(),
            sinfo_command: vec!["sinfo".to_string(), "--json".to_string()],
            nodes_file: None,
            fetch_timeout_secs: 10,
            poll_limit_secs: 10,
            serve_stale_on_error: false,
        }
    }
}

impl ExporterSettings {
    /// Loads settings from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading exporter settings from {}", path.display());

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: ExporterSettings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    /// Checks the settings for values the exporter cannot run with
    ///
    /// # Returns
    /// * `Ok(SocketAddr)` - The parsed listen address
    /// * `Err(ConfigError)` - The first invalid value found
    pub fn validate(&self) -> Result<SocketAddr, ConfigError> {
        if self.nodes_file.is_none() && self.sinfo_command.is_empty() {
            return Err(ConfigError::InvalidValue(
                "sinfo_command must not be empty".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "fetch_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.poll_limit_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "poll_limit_secs must be greater than zero".to_string(),
            ));
        }
        self.listen_address.parse().map_err(|e| {
            ConfigError::InvalidValue(format!(
                "listen_address '{}': {}",
                self.listen_address, e
            ))
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            min_interval: Duration::from_secs(self.poll_limit_secs),
            serve_stale_on_error: self.serve_stale_on_error,
        }
    }

    /// Logs the effective settings
    pub fn log_summary(&self) {
        info!("  Listen address: {}", self.listen_address);
        match &self.nodes_file {
            Some(path) => info!("  Node inventory: file {}", path.display()),
            None => info!("  Node inventory: command `{}`", self.sinfo_command.join(" ")),
        }
        info!(
            "  Fetch timeout: {}s, poll limit: {}s, serve stale on error: {}",
            self.fetch_timeout_secs, self.poll_limit_secs, self.serve_stale_on_error
        );
    }
}
