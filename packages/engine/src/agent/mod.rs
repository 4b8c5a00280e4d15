// packages/engine/src/agent/mod.rs
//! Agent process side
//!
//! - **Launch**: command-line contract between agency and agent
//! - **Host**: process lifecycle and supervision loop
//! - **Remote Agent**: command dispatch with single in-flight run
//! - **Parent**: locating and watching the agency process
//! - **Debugger**: `--debug-agent` support
//! - **Exit Codes**: the documented process exit codes

pub mod debugger;
pub mod executor;
pub mod exit_codes;
pub mod host;
pub mod launch;
pub mod parent;
pub mod remote_agent;

pub use executor::{ProcessExecutor, TestExecutor};
pub use exit_codes::AgentExitCode;
pub use host::{run_agent, AgentEnvironment, LogSink};
pub use launch::{LaunchOptions, TraceLevel};
pub use parent::{OsProcessLocator, ParentProcess, ProcessLocator};
pub use remote_agent::{AgentState, RemoteTestAgent};
