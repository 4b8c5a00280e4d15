// packages/engine/src/services/mod.rs
//! Long-lived process services
//!
//! - **Context**: dependency-ordered start/stop registry
//! - **Extensions**: extension manifest discovery

pub mod context;
pub mod extensions;

pub use context::{Service, ServiceContext, ServiceStatus, StartReport};
pub use extensions::{ExtensionManifest, ExtensionService};
