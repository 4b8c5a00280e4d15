// packages/engine/src/transport/protocol.rs
//! Messages exchanged between an agent and its agency
//!
//! Every message travels inside an [`Envelope`]; replies carry the id of the
//! command they answer so the agency can match them even when a `Busy`
//! rejection overtakes the result of an earlier run.

use crate::runners::package::TestPackage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope id reserved for the connection handshake
pub const HANDSHAKE_ID: u64 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(id: u64, body: T) -> Self {
        Self { id, body }
    }
}

/// Agency → agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AgentCommand {
    Run(RunRequest),
    Ping,
    Stop,
}

/// Agent → agency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum AgentReply {
    Register { agent_id: Uuid },
    Result(RunResult),
    Busy { in_flight: u64 },
    Pong,
    Stopping,
    Failed { message: String },
}

/// A request to execute the tests of a package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub package: TestPackage,

    /// Passed through to the test executables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RunRequest {
    pub fn new(package: TestPackage) -> Self {
        Self {
            package,
            filter: None,
            timeout_ms: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    TimedOut,
}

/// Outcome of one assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyResult {
    pub assembly: String,
    pub status: TestStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub output: String,
}

/// Outcome of a whole run request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub agent_id: Uuid,
    pub assemblies: Vec<AssemblyResult>,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.assemblies.iter().all(|a| a.status == TestStatus::Passed)
    }
}
