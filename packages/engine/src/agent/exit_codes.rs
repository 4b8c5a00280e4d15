// packages/engine/src/agent/exit_codes.rs
//! Exit codes reported by the agent process
//!
//! The values are part of the launch contract: the agency inspects the exit
//! status of every agent it started to tell failure classes apart. POSIX
//! `wait` only reports the low 8 bits, so [`AgentExitCode::from_raw`]
//! accepts both the signed value and its truncated form.

use std::fmt;

/// Documented agent exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentExitCode {
    Ok,
    ParentProcessTerminated,
    FailedToStartRemoteAgent,
    DebuggerSecurityViolation,
    DebuggerNotImplemented,
    UnableToLocateAgency,
    UnexpectedException,
}

impl AgentExitCode {
    pub const ALL: [AgentExitCode; 7] = [
        AgentExitCode::Ok,
        AgentExitCode::ParentProcessTerminated,
        AgentExitCode::FailedToStartRemoteAgent,
        AgentExitCode::DebuggerSecurityViolation,
        AgentExitCode::DebuggerNotImplemented,
        AgentExitCode::UnableToLocateAgency,
        AgentExitCode::UnexpectedException,
    ];

    /// Integer passed to `std::process::exit`
    pub fn code(self) -> i32 {
        match self {
            AgentExitCode::Ok => 0,
            AgentExitCode::ParentProcessTerminated => -1,
            AgentExitCode::FailedToStartRemoteAgent => -2,
            AgentExitCode::DebuggerSecurityViolation => -3,
            AgentExitCode::DebuggerNotImplemented => -4,
            AgentExitCode::UnableToLocateAgency => -5,
            AgentExitCode::UnexpectedException => -100,
        }
    }

    /// Decode a raw status, signed or truncated to the low byte
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|code| code.code() == raw || (code.code() & 0xff) == raw)
    }

    /// Stable name used in logs and diagnostics
    pub fn name(self) -> &'static str {
        match self {
            AgentExitCode::Ok => "OK",
            AgentExitCode::ParentProcessTerminated => "PARENT_PROCESS_TERMINATED",
            AgentExitCode::FailedToStartRemoteAgent => "FAILED_TO_START_REMOTE_AGENT",
            AgentExitCode::DebuggerSecurityViolation => "DEBUGGER_SECURITY_VIOLATION",
            AgentExitCode::DebuggerNotImplemented => "DEBUGGER_NOT_IMPLEMENTED",
            AgentExitCode::UnableToLocateAgency => "UNABLE_TO_LOCATE_AGENCY",
            AgentExitCode::UnexpectedException => "UNEXPECTED_EXCEPTION",
        }
    }

    pub fn is_success(self) -> bool {
        self == AgentExitCode::Ok
    }
}

impl fmt::Display for AgentExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
