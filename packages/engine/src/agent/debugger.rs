// packages/engine/src/agent/debugger.rs
//! `--debug-agent` support
//!
//! There is no portable way for a process to launch a debugger on itself.
//! On Linux the agent stops itself with `SIGSTOP` so a debugger can attach
//! and continue it; when ptrace is restricted to administrators that is a
//! security violation. Other platforms report not-implemented.

use crate::agent::exit_codes::AgentExitCode;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("not permitted to attach a debugger: {0}")]
    SecurityViolation(String),

    #[error("debugger attach is not available on this platform: {0}")]
    NotImplemented(String),
}

impl DebuggerError {
    pub fn exit_code(&self) -> AgentExitCode {
        match self {
            DebuggerError::SecurityViolation(_) => AgentExitCode::DebuggerSecurityViolation,
            DebuggerError::NotImplemented(_) => AgentExitCode::DebuggerNotImplemented,
        }
    }
}

pub trait DebuggerAttach: Send + Sync {
    fn is_attached(&self) -> bool;

    /// Block until a debugger is attached
    fn launch(&self) -> std::result::Result<(), DebuggerError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsDebugger;

#[cfg(target_os = "linux")]
impl DebuggerAttach for OsDebugger {
    fn is_attached(&self) -> bool {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| tracer_pid(&status))
            .is_some_and(|pid| pid != 0)
    }

    fn launch(&self) -> std::result::Result<(), DebuggerError> {
        use nix::sys::signal::{raise, Signal};

        let scope = std::fs::read_to_string("/proc/sys/kernel/yama/ptrace_scope")
            .ok()
            .and_then(|s| s.trim().parse::<u8>().ok())
            .unwrap_or(0);
        if scope >= 2 {
            return Err(DebuggerError::SecurityViolation(format!(
                "kernel.yama.ptrace_scope is {}",
                scope
            )));
        }

        info!(pid = std::process::id(), "Waiting for debugger to attach");
        raise(Signal::SIGSTOP).map_err(|e| DebuggerError::SecurityViolation(e.to_string()))
    }
}

#[cfg(not(target_os = "linux"))]
impl DebuggerAttach for OsDebugger {
    fn is_attached(&self) -> bool {
        false
    }

    fn launch(&self) -> std::result::Result<(), DebuggerError> {
        Err(DebuggerError::NotImplemented(std::env::consts::OS.to_string()))
    }
}

#[cfg(target_os = "linux")]
fn tracer_pid(status: &str) -> Option<i32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse().ok())
}

/// Attach unless already attached
pub fn try_attach(debugger: &dyn DebuggerAttach) -> std::result::Result<(), DebuggerError> {
    if debugger.is_attached() {
        return Ok(());
    }
    debugger.launch()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Recorder {
        attached: bool,
        launched: AtomicBool,
    }

    impl DebuggerAttach for Recorder {
        fn is_attached(&self) -> bool {
            self.attached
        }

        fn launch(&self) -> std::result::Result<(), DebuggerError> {
            self.launched.store(true, Ordering::SeqCst);
            Err(DebuggerError::NotImplemented("test".into()))
        }
    }

    #[test]
    fn test_already_attached_skips_launch() {
        let debugger = Recorder { attached: true, launched: AtomicBool::new(false) };
        assert!(try_attach(&debugger).is_ok());
        assert!(!debugger.launched.load(Ordering::SeqCst));
    }

    #[test]
    fn test_launch_failure_maps_exit_code() {
        let debugger = Recorder { attached: false, launched: AtomicBool::new(false) };
        let err = try_attach(&debugger).unwrap_err();
        assert_eq!(err.exit_code(), AgentExitCode::DebuggerNotImplemented);
        assert_eq!(
            DebuggerError::SecurityViolation("x".into()).exit_code(),
            AgentExitCode::DebuggerSecurityViolation
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_tracer_pid_parsing() {
        assert_eq!(tracer_pid("Name:\tx\nTracerPid:\t0\n"), Some(0));
        assert_eq!(tracer_pid("TracerPid:\t812\n"), Some(812));
        assert_eq!(tracer_pid("Name:\tx\n"), None);
    }
}
