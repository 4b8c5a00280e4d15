// packages/engine/src/utils/mod.rs
//! Common utilities shared by the agent and the agency

pub mod config;
pub mod errors;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
