// packages/engine/src/lib.rs
//! Test Agency Engine Library
//!
//! This library provides the pieces needed to run tests in separate agent
//! processes that are driven remotely by a test agency.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **agent**: Agent process bootstrap, parent monitoring, remote test agent
//! - **transport**: Agent/agency wire protocol over TCP or in-process channels
//! - **runtime**: Agency side: launching, tracking and driving agents
//! - **runners**: Test packages and runner topology selection
//! - **services**: Service context with dependency-ordered startup
//! - **observability**: Tracing setup
//! - **utils**: Configuration and errors

// Public module exports
pub mod agent;
pub mod observability;
pub mod runners;
pub mod runtime;
pub mod services;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use agent::{run_agent, AgentEnvironment, AgentExitCode, RemoteTestAgent};
pub use runners::{RunnerFactory, RunnerTopology, TestPackage};
pub use runtime::{AgentClient, TestAgency};
pub use services::{Service, ServiceContext};
pub use transport::{AgencyEndpoint, Transport, TransportFactory};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
