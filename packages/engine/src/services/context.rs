// packages/engine/src/services/context.rs
//! Service context
//!
//! Services are started in dependency order (Kahn's algorithm, registration
//! order breaking ties) and stopped in reverse start order. Unknown
//! dependencies and cycles are rejected before any start hook runs. A failed
//! service keeps its dependents from starting but does not undo services
//! that already started.

use crate::utils::errors::{EngineError, Result};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// A long-lived capability with an explicit lifecycle
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Names of services that must be started first
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    Started,
    Failed,
}

struct ServiceEntry {
    service: Box<dyn Service>,
    status: ServiceStatus,
}

/// Outcome of [`ServiceContext::start_services`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    pub started: Vec<String>,
    /// Service name and failure message
    pub failed: Vec<(String, String)>,
    /// Not started because a dependency is not running
    pub skipped: Vec<String>,
}

impl StartReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Registry of services with a start/stop lifecycle
#[derive(Default)]
pub struct ServiceContext {
    entries: Vec<ServiceEntry>,
    start_order: Vec<usize>,
}

impl ServiceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service; names must be unique
    pub fn add<S: Service + 'static>(&mut self, service: S) -> Result<()> {
        if self.index_of(service.name()).is_some() {
            return Err(EngineError::ServiceFailed(
                service.name().to_string(),
                "already registered".to_string(),
            ));
        }
        debug!("Registering service {}", service.name());
        self.entries.push(ServiceEntry {
            service: Box::new(service),
            status: ServiceStatus::Stopped,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.index_of(name).map(|i| self.entries[i].status)
    }

    /// Typed access to a registered service
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.entries
            .iter()
            .find_map(|entry| entry.service.as_any().downcast_ref::<T>())
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.service.name() == name)
    }

    /// Start order, or the configuration error that prevents starting
    pub fn resolve_order(&self) -> Result<Vec<usize>> {
        let names: HashMap<&str, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.service.name(), i))
            .collect();

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let mut resolved = Vec::new();
            for dependency in entry.service.dependencies() {
                let index = names.get(dependency.as_str()).ok_or_else(|| EngineError::UnknownDependency {
                    service: entry.service.name().to_string(),
                    dependency: dependency.clone(),
                })?;
                resolved.push(*index);
            }
            deps.push(resolved);
        }

        let mut placed = vec![false; self.entries.len()];
        let mut order = Vec::with_capacity(self.entries.len());
        while order.len() < self.entries.len() {
            let next = (0..self.entries.len())
                .find(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d]));
            match next {
                Some(i) => {
                    placed[i] = true;
                    order.push(i);
                }
                None => {
                    return Err(EngineError::DependencyCycle {
                        services: self.find_cycle(&deps, &placed),
                    })
                }
            }
        }
        Ok(order)
    }

    /// Walk unplaced services until one repeats
    fn find_cycle(&self, deps: &[Vec<usize>], placed: &[bool]) -> Vec<String> {
        let Some(mut current) = (0..placed.len()).find(|&i| !placed[i]) else {
            return Vec::new();
        };
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        while seen.insert(current) {
            path.push(current);
            // an unplaced service always has at least one unplaced dependency
            match deps[current].iter().find(|&&d| !placed[d]) {
                Some(&d) => current = d,
                None => break,
            }
        }
        let start = path.iter().position(|&i| i == current).unwrap_or(0);
        let mut cycle: Vec<String> = path[start..]
            .iter()
            .map(|&i| self.entries[i].service.name().to_string())
            .collect();
        cycle.push(self.entries[current].service.name().to_string());
        cycle
    }

    /// Start every registered service that is not already started
    pub fn start_services(&mut self) -> Result<StartReport> {
        let order = self.resolve_order()?;
        let mut report = StartReport::default();

        for index in order {
            let name = self.entries[index].service.name().to_string();
            if self.entries[index].status == ServiceStatus::Started {
                report.started.push(name);
                continue;
            }

            let blocked = self.entries[index]
                .service
                .dependencies()
                .iter()
                .any(|dep| self.status(dep) != Some(ServiceStatus::Started));
            if blocked {
                warn!("Skipping service {}: a dependency is not started", name);
                report.skipped.push(name);
                continue;
            }

            let entry = &mut self.entries[index];
            match entry.service.start() {
                Ok(()) => {
                    debug!("Started service {}", name);
                    entry.status = ServiceStatus::Started;
                    self.start_order.push(index);
                    report.started.push(name);
                }
                Err(e) => {
                    error!("Failed to start service {}: {}", name, e);
                    entry.status = ServiceStatus::Failed;
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Services initialized"
        );
        Ok(report)
    }

    /// Stop started services in reverse start order; failures are returned
    /// and logged, and never keep the remaining services from stopping
    pub fn stop_services(&mut self) -> Vec<(String, EngineError)> {
        let mut failures = Vec::new();
        while let Some(index) = self.start_order.pop() {
            let entry = &mut self.entries[index];
            let name = entry.service.name().to_string();
            if let Err(e) = entry.service.stop() {
                warn!("Failed to stop service {}: {}", name, e);
                failures.push((name, e));
            } else {
                debug!("Stopped service {}", name);
            }
            entry.status = ServiceStatus::Stopped;
        }
        failures
    }
}
