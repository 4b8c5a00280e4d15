// packages/engine/src/runners/mod.rs
//! Runner selection
//!
//! - **Package**: assemblies plus string-keyed settings
//! - **Factory**: decides the runner topology for a package and how many
//!   agents it needs

pub mod factory;
pub mod package;

pub use factory::{ExecutionDomain, RunnerFactory, RunnerTopology, TestRunner};
pub use package::{DomainUsage, ProcessModel, TestPackage};
