// packages/engine/src/runtime/mod.rs
//! Agency-side agent management
//!
//! - **Agency**: launches agents and routes requests to them
//! - **Agent Record**: liveness bookkeeping per agent process
//! - **Client**: request/response routing over one agent connection
//! - **Process Manager**: spawning and signalling agent processes

pub mod agency;
pub mod agent_record;
pub mod client;
pub mod process_manager;

pub use agency::{AgentLaunch, TestAgency};
pub use agent_record::{AgentRecord, Liveness};
pub use client::AgentClient;
pub use process_manager::ProcessManager;
