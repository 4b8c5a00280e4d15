// packages/engine/src/agent/parent.rs
//! Locating and watching the agency process
//!
//! An agent must never outlive its agency. The supervision loop asks the
//! located [`ParentProcess`] on every tick whether it has exited; this works
//! even when the transport is silent.

use crate::utils::errors::{EngineError, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{getppid, Pid};
use tracing::debug;

pub trait ParentProcess: Send + Sync {
    fn pid(&self) -> i32;

    fn has_exited(&self) -> bool;
}

pub trait ProcessLocator: Send + Sync {
    fn locate(&self, pid: i32) -> Result<Box<dyn ParentProcess>>;
}

/// Probes processes with signal 0
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessLocator;

impl ProcessLocator for OsProcessLocator {
    fn locate(&self, pid: i32) -> Result<Box<dyn ParentProcess>> {
        // 0 and negative pids address process groups
        if pid <= 0 {
            return Err(EngineError::ParentNotFound {
                pid,
                reason: "not a process id".to_string(),
            });
        }

        let target = Pid::from_raw(pid);
        match kill(target, None) {
            Ok(()) | Err(Errno::EPERM) => {
                let is_direct_parent = getppid() == target;
                debug!(pid, is_direct_parent, "Located agency process");
                Ok(Box::new(OsParentProcess { pid: target, is_direct_parent }))
            }
            Err(e) => Err(EngineError::ParentNotFound {
                pid,
                reason: e.to_string(),
            }),
        }
    }
}

#[derive(Debug)]
struct OsParentProcess {
    pid: Pid,
    is_direct_parent: bool,
}

impl ParentProcess for OsParentProcess {
    fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    fn has_exited(&self) -> bool {
        // an exited parent can linger as a zombie, but we are re-parented at once
        if self.is_direct_parent && getppid() != self.pid {
            return true;
        }
        matches!(kill(self.pid, None), Err(Errno::ESRCH))
    }
}
