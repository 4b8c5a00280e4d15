// packages/engine/src/runtime/agent_record.rs
//! Agency bookkeeping for one agent process
//!
//! Two independent signals end an agent: the OS process exits, and its
//! transport closes. Whichever arrives first moves the record to `Lost`;
//! the other confirms it and moves it to `Exited`. Each signal counts once.

use crate::agent::exit_codes::AgentExitCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Starting,
    Connected,
    Running,
    Stopping,
    Lost,
    Exited,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    pub agent_id: Uuid,
    pub pid: Option<u32>,
    pub liveness: Liveness,
    pub process_exited: bool,
    pub transport_closed: bool,
    pub connected_once: bool,
    /// Raw status from the OS, if the process exited normally
    pub exit_status: Option<i32>,
    pub launched_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(agent_id: Uuid, pid: Option<u32>) -> Self {
        let now = Utc::now();
        Self {
            agent_id,
            pid,
            liveness: Liveness::Starting,
            process_exited: false,
            transport_closed: false,
            connected_once: false,
            exit_status: None,
            launched_at: now,
            updated_at: now,
        }
    }

    fn set(&mut self, liveness: Liveness) {
        self.liveness = liveness;
        self.updated_at = Utc::now();
    }

    fn is_ending(&self) -> bool {
        matches!(self.liveness, Liveness::Lost | Liveness::Exited)
    }

    pub fn mark_connected(&mut self) {
        self.connected_once = true;
        if self.liveness == Liveness::Starting {
            self.set(Liveness::Connected);
        }
    }

    pub fn mark_running(&mut self) {
        if self.liveness == Liveness::Connected {
            self.set(Liveness::Running);
        }
    }

    pub fn mark_idle(&mut self) {
        if self.liveness == Liveness::Running {
            self.set(Liveness::Connected);
        }
    }

    pub fn mark_stopping(&mut self) {
        if !self.is_ending() {
            self.set(Liveness::Stopping);
        }
    }

    /// The OS reports the process gone
    pub fn observe_process_exit(&mut self, status: Option<i32>) -> Liveness {
        if self.process_exited {
            return self.liveness;
        }
        self.process_exited = true;
        self.exit_status = status;
        // a process that never connected has no transport left to confirm
        if !self.connected_once {
            self.transport_closed = true;
        }
        self.advance()
    }

    /// The transport reports closed or failed
    pub fn observe_transport_closed(&mut self) -> Liveness {
        if self.transport_closed {
            return self.liveness;
        }
        self.transport_closed = true;
        self.advance()
    }

    fn advance(&mut self) -> Liveness {
        if self.process_exited && self.transport_closed {
            self.set(Liveness::Exited);
        } else {
            self.set(Liveness::Lost);
        }
        self.liveness
    }

    pub fn is_exited(&self) -> bool {
        self.liveness == Liveness::Exited
    }

    pub fn exit_code(&self) -> Option<AgentExitCode> {
        self.exit_status.and_then(AgentExitCode::from_raw)
    }
}
