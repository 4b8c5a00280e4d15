// packages/engine/src/utils/errors.rs
//! Engine error type
//!
//! Every fallible operation in the crate returns [`Result`]. Errors that
//! correspond to a documented agent exit code expose it through
//! [`EngineError::exit_code`].

use crate::agent::exit_codes::AgentExitCode;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the agent runtime, transports, runners and services
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid launch arguments: {0}")]
    InvalidArguments(String),

    #[error("invalid agency endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("parent process {pid} not found: {reason}")]
    ParentNotFound { pid: i32, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("agent is busy with request {in_flight}")]
    AgentBusy { in_flight: u64 },

    #[error("agent {0} not found")]
    AgentNotFound(uuid::Uuid),

    #[error("service dependency cycle: {}", services.join(" -> "))]
    DependencyCycle { services: Vec<String> },

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("service '{0}' failed: {1}")]
    ServiceFailed(String, String),

    #[error("failed to spawn process: {0}")]
    ProcessSpawnFailed(String),

    #[error("execution timed out")]
    ExecutionTimeout,

    #[error("runtime error: {0}")]
    RuntimeError(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Exit code the agent process reports when this error ends its run
    pub fn exit_code(&self) -> AgentExitCode {
        match self {
            EngineError::InvalidArguments(_)
            | EngineError::InvalidEndpoint(_)
            | EngineError::ParentNotFound { .. } => AgentExitCode::UnableToLocateAgency,
            _ => AgentExitCode::UnexpectedException,
        }
    }

    /// Whether this error is a configuration error rather than a runtime fault
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidArguments(_)
                | EngineError::InvalidEndpoint(_)
                | EngineError::ParentNotFound { .. }
                | EngineError::DependencyCycle { .. }
                | EngineError::UnknownDependency { .. }
                | EngineError::Config(_)
        )
    }
}
