// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Loaded from an optional `agency.toml` (or the file named by
//! `AGENCY_CONFIG`), then overridden by `AGENCY__SECTION__KEY` environment
//! variables. Every field has a default, so an empty environment is valid.

use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "agency.toml";
const CONFIG_PATH_VAR: &str = "AGENCY_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub agent: AgentSettings,
    pub agency: AgencySettings,
    pub runner: RunnerSettings,
    pub extensions: ExtensionSettings,
}

/// Settings used inside the agent process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Supervision loop tick in milliseconds
    pub poll_interval_ms: u64,

    /// Upper bound for establishing the transport
    pub connect_timeout_ms: u64,

    /// Exit when `--debug-agent` cannot attach a debugger
    pub debugger_failure_fatal: bool,

    /// Log file name prefix; the pid and `.log` are appended
    pub log_file_prefix: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            connect_timeout_ms: 10_000,
            debugger_failure_fatal: true,
            log_file_prefix: "agency-agent".to_string(),
        }
    }
}

impl AgentSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Settings used by the parent-side agency
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgencySettings {
    /// Address the agency listens on for agent connections
    pub bind_address: String,

    /// Agent executable; defaults to `agency-agent` beside the current binary
    pub agent_executable: Option<PathBuf>,

    /// Grace period between a stop command and killing the process
    pub stop_timeout_ms: u64,

    /// Upper bound for a single request/response exchange
    pub request_timeout_ms: u64,
}

impl Default for AgencySettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            agent_executable: None,
            stop_timeout_ms: 5_000,
            request_timeout_ms: 300_000,
        }
    }
}

impl AgencySettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// When false every package runs in process, without separate domains
    pub process_isolation: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self { process_isolation: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionSettings {
    /// Directories scanned for `*.extension.yaml` manifests
    pub directories: Vec<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from the default file location and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load configuration from a specific file (optional) and environment
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("AGENCY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
