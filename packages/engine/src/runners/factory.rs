// packages/engine/src/runners/factory.rs
//! Runner factory
//!
//! Decides, from a package's assemblies and settings, how many execution
//! contexts ("domains") to create:
//!
//! | assemblies | DomainUsage          | topology        |
//! |------------|----------------------|-----------------|
//! | any        | None / no isolation  | InProcess       |
//! | 0 or 1     | anything else        | SingleDomain    |
//! | 2+         | absent / Multiple    | MultipleDomain  |
//! | 2+         | Single               | SingleDomain    |
//!
//! The decision never fails; unknown settings fall back to the defaults.
//!
//! The same decision says where the runner executes: an `InProcess` topology
//! or `ProcessModel = InProcess` runs in the caller's process, anything else
//! in agent processes (one per assembly for `ProcessModel = Multiple`).

use crate::runners::package::{DomainUsage, ProcessModel, TestPackage};
use crate::services::Service;
use crate::utils::config::RunnerSettings;
use crate::utils::errors::Result;
use std::any::Any;
use std::path::Path;
use tracing::debug;

pub const SERVICE_NAME: &str = "RunnerFactory";

/// Shape of the runner for one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerTopology {
    InProcess { assemblies: Vec<String> },
    SingleDomain { assemblies: Vec<String> },
    MultipleDomain { assemblies: Vec<String> },
}

impl RunnerTopology {
    pub fn assemblies(&self) -> &[String] {
        match self {
            RunnerTopology::InProcess { assemblies }
            | RunnerTopology::SingleDomain { assemblies }
            | RunnerTopology::MultipleDomain { assemblies } => assemblies,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunnerTopology::InProcess { .. } => "InProcess",
            RunnerTopology::SingleDomain { .. } => "SingleDomain",
            RunnerTopology::MultipleDomain { .. } => "MultipleDomain",
        }
    }
}

/// One execution context a runner will create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionDomain {
    pub name: String,
    pub assemblies: Vec<String>,
    /// False for the in-process runner, which shares the caller's context
    pub isolated: bool,
}

/// Runner built for one package
#[derive(Debug, Clone, PartialEq)]
pub struct TestRunner {
    topology: RunnerTopology,
    package: TestPackage,
    agent_packages: Vec<TestPackage>,
}

impl TestRunner {
    pub fn topology(&self) -> &RunnerTopology {
        &self.topology
    }

    pub fn package(&self) -> &TestPackage {
        &self.package
    }

    /// True when no agent process is involved
    pub fn is_in_process(&self) -> bool {
        matches!(self.topology, RunnerTopology::InProcess { .. })
            || self.package.process_model() == ProcessModel::InProcess
    }

    /// Packages handed to agent processes, one agent each; empty in process
    pub fn agent_packages(&self) -> &[TestPackage] {
        &self.agent_packages
    }

    /// Execution contexts in assembly order
    pub fn domains(&self) -> Vec<ExecutionDomain> {
        match &self.topology {
            RunnerTopology::InProcess { assemblies } => vec![ExecutionDomain {
                name: "in-process".to_string(),
                assemblies: assemblies.clone(),
                isolated: false,
            }],
            RunnerTopology::SingleDomain { assemblies } => vec![ExecutionDomain {
                name: "domain-0".to_string(),
                assemblies: assemblies.clone(),
                isolated: true,
            }],
            RunnerTopology::MultipleDomain { assemblies } => assemblies
                .iter()
                .enumerate()
                .map(|(index, assembly)| ExecutionDomain {
                    name: format!("domain-{}-{}", index, assembly_stem(assembly)),
                    assemblies: vec![assembly.clone()],
                    isolated: true,
                })
                .collect(),
        }
    }
}

fn assembly_stem(assembly: &str) -> &str {
    Path::new(assembly)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(assembly)
}

/// Chooses runner topologies; registered as a service
#[derive(Debug, Clone)]
pub struct RunnerFactory {
    process_isolation: bool,
}

impl RunnerFactory {
    pub fn new() -> Self {
        Self { process_isolation: true }
    }

    pub fn from_settings(settings: &RunnerSettings) -> Self {
        Self::new().with_process_isolation(settings.process_isolation)
    }

    /// A runtime without isolation support runs everything in process
    pub fn with_process_isolation(mut self, enabled: bool) -> Self {
        self.process_isolation = enabled;
        self
    }

    pub fn topology(&self, package: &TestPackage) -> RunnerTopology {
        let assemblies = package.assemblies.clone();
        let usage = package.domain_usage();

        if !self.process_isolation || usage == DomainUsage::None {
            return RunnerTopology::InProcess { assemblies };
        }
        if assemblies.len() <= 1 {
            return RunnerTopology::SingleDomain { assemblies };
        }
        match usage {
            DomainUsage::Single => RunnerTopology::SingleDomain { assemblies },
            DomainUsage::Multiple | DomainUsage::Default | DomainUsage::None => {
                RunnerTopology::MultipleDomain { assemblies }
            }
        }
    }

    pub fn make_runner(&self, package: &TestPackage) -> TestRunner {
        let topology = self.topology(package);
        let mut runner = TestRunner {
            topology,
            package: package.clone(),
            agent_packages: Vec::new(),
        };

        if !runner.is_in_process() {
            runner.agent_packages = match package.process_model() {
                ProcessModel::Multiple => package
                    .assemblies
                    .iter()
                    .map(|assembly| package.for_assembly(assembly))
                    .collect(),
                _ => vec![package.clone()],
            };
        }

        debug!(
            topology = runner.topology.name(),
            assemblies = package.assemblies.len(),
            agents = runner.agent_packages.len(),
            "Selected runner"
        );
        runner
    }

    /// Split a package into the packages each agent process receives
    pub fn plan_agents(&self, package: &TestPackage) -> Vec<TestPackage> {
        self.make_runner(package).agent_packages
    }
}

impl Default for RunnerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for RunnerFactory {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn start(&mut self) -> Result<()> {
        debug!(process_isolation = self.process_isolation, "Runner factory started");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
