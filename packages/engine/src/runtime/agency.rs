// packages/engine/src/runtime/agency.rs
//! Test agency: launches agents and tracks them until they are gone
//!
//! # Architecture
//!
//! ```text
//! TestAgency
//! ├─ services        RunnerFactory and ExtensionService
//! ├─ listener task   accepts connections; one handshake task per connection
//! ├─ exit monitor    one per agent, owns the child process
//! ├─ close monitor   one per connection, waits for the transport to end
//! └─ records         AgentRecord per live agent, dropped once Exited
//! ```
//!
//! Process exit and transport closure are watched independently, so a
//! silent transport or a killed process is still noticed. Packages whose
//! runner is in process execute on the agency's own [`TestExecutor`].

use crate::agent::executor::{ProcessExecutor, TestExecutor};
use crate::agent::launch::{LaunchOptions, TraceLevel};
use crate::runners::{RunnerFactory, TestPackage, TestRunner};
use crate::runtime::agent_record::{AgentRecord, Liveness};
use crate::runtime::client::AgentClient;
use crate::runtime::process_manager::ProcessManager;
use crate::services::{ExtensionService, ServiceContext};
use crate::transport::protocol::{RunRequest, RunResult};
use crate::transport::{AgencyEndpoint, AgentConnection, TcpAgencyListener};
use crate::utils::config::{AgencySettings, EngineConfig};
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-launch agent options
#[derive(Debug, Clone, Default)]
pub struct AgentLaunch {
    pub trace_level: TraceLevel,
    pub work_directory: PathBuf,
    pub debug_agent: bool,
}

#[derive(Default)]
struct Registry {
    records: DashMap<Uuid, AgentRecord>,
    clients: DashMap<Uuid, Arc<AgentClient>>,
    /// Asks an exit monitor to terminate the child it owns
    killers: DashMap<Uuid, oneshot::Sender<()>>,
    changed: Notify,
}

impl Registry {
    /// Apply an observation; drop the agent once it has fully exited
    fn observe(&self, agent_id: Uuid, apply: impl FnOnce(&mut AgentRecord) -> Liveness) {
        let liveness = match self.records.get_mut(&agent_id) {
            Some(mut record) => apply(record.value_mut()),
            None => return,
        };
        match liveness {
            Liveness::Lost => {
                metrics::counter!("agency_agents_lost_total").increment(1);
                debug!(%agent_id, "Agent lost, waiting for confirmation");
            }
            Liveness::Exited => {
                if let Some((_, record)) = self.records.remove(&agent_id) {
                    info!(%agent_id, exit = ?record.exit_code(), "Agent exited");
                }
                self.clients.remove(&agent_id);
                self.killers.remove(&agent_id);
            }
            _ => {}
        }
        self.changed.notify_waiters();
    }

    fn attach(self: &Arc<Self>, connection: AgentConnection, request_timeout: Duration) {
        let agent_id = connection.agent_id;
        match self.records.get_mut(&agent_id) {
            Some(mut record) if !record.transport_closed => record.mark_connected(),
            _ => {
                warn!(%agent_id, "Connection from unknown agent rejected");
                return;
            }
        }

        let client = AgentClient::spawn(connection, request_timeout);
        self.clients.insert(agent_id, Arc::clone(&client));
        self.changed.notify_waiters();

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            client.closed().await;
            registry.observe(agent_id, AgentRecord::observe_transport_closed);
        });
    }
}

pub struct TestAgency {
    settings: AgencySettings,
    processes: ProcessManager,
    services: Mutex<ServiceContext>,
    executor: Arc<dyn TestExecutor>,
    endpoint: AgencyEndpoint,
    registry: Arc<Registry>,
    listener_task: JoinHandle<()>,
}

impl TestAgency {
    /// Start the agency services, bind the endpoint and accept agents
    pub async fn start(config: &EngineConfig, processes: ProcessManager) -> Result<Self> {
        let mut services = ServiceContext::new();
        services.add(ExtensionService::new(config.extensions.directories.clone()))?;
        services.add(RunnerFactory::from_settings(&config.runner))?;
        let report = services.start_services()?;
        for (name, message) in &report.failed {
            warn!("Service {} failed to start: {}", name, message);
        }

        let settings = config.agency.clone();
        let listener = TcpAgencyListener::bind(&settings.bind_address).await?;
        let endpoint = listener.endpoint();
        let registry = Arc::new(Registry::default());

        let request_timeout = settings.request_timeout();
        let accept_registry = Arc::clone(&registry);
        let listener_task = tokio::spawn(async move {
            loop {
                let pending = match listener.accept_pending().await {
                    Ok(pending) => pending,
                    Err(e) => {
                        warn!("Failed to accept agent connection: {}", e);
                        continue;
                    }
                };
                let registry = Arc::clone(&accept_registry);
                tokio::spawn(async move {
                    let peer = pending.peer();
                    match pending.handshake(HANDSHAKE_TIMEOUT).await {
                        Ok(connection) => registry.attach(connection, request_timeout),
                        Err(e) => warn!(%peer, "Rejected agent connection: {}", e),
                    }
                });
            }
        });

        Ok(Self {
            executor: Arc::new(ProcessExecutor::new(request_timeout)),
            settings,
            processes,
            services: Mutex::new(services),
            endpoint,
            registry,
            listener_task,
        })
    }

    /// Executor for packages whose runner is in process
    pub fn with_executor(mut self, executor: Arc<dyn TestExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// The runner factory service
    pub fn runner_factory(&self) -> Result<RunnerFactory> {
        self.services
            .lock()
            .get::<RunnerFactory>()
            .cloned()
            .ok_or_else(|| EngineError::RuntimeError("runner factory service is not registered".into()))
    }

    pub fn endpoint(&self) -> &AgencyEndpoint {
        &self.endpoint
    }

    /// Snapshot of one agent's record
    pub fn record(&self, agent_id: Uuid) -> Option<AgentRecord> {
        self.registry.records.get(&agent_id).map(|r| r.clone())
    }

    pub fn agent_count(&self) -> usize {
        self.registry.records.len()
    }

    /// Spawn an agent process that will connect back to this agency
    pub fn launch_agent(&self, launch: AgentLaunch) -> Result<Uuid> {
        let agent_id = Uuid::new_v4();
        let options = LaunchOptions {
            agent_id,
            agency: self.endpoint.clone(),
            trace_level: launch.trace_level,
            work_directory: launch.work_directory,
            parent_pid: Some(std::process::id() as i32),
            debug_agent: launch.debug_agent,
            rejected_trace: None,
        };

        let mut child = self.processes.spawn(&options)?;
        self.registry
            .records
            .insert(agent_id, AgentRecord::new(agent_id, child.id()));
        metrics::counter!("agency_agents_launched_total").increment(1);

        let (kill_tx, kill_rx) = oneshot::channel();
        self.registry.killers.insert(agent_id, kill_tx);

        let registry = Arc::clone(&self.registry);
        let processes = self.processes.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status.map_err(EngineError::from),
                Ok(()) = kill_rx => {
                    warn!(%agent_id, "Terminating agent process");
                    processes.terminate(&mut child).await
                }
            };
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(%agent_id, "Failed to wait for agent process: {}", e);
                    None
                }
            };
            registry.observe(agent_id, |record| record.observe_process_exit(code));
        });

        Ok(agent_id)
    }

    /// Wait until the agent has connected
    pub async fn wait_for_connection(&self, agent_id: Uuid, timeout: Duration) -> Result<Arc<AgentClient>> {
        let wait = async {
            loop {
                let changed = self.registry.changed.notified();
                if let Some(client) = self.registry.clients.get(&agent_id) {
                    return Ok(Arc::clone(client.value()));
                }
                match self.registry.records.get(&agent_id).map(|r| r.liveness) {
                    None | Some(Liveness::Lost) | Some(Liveness::Exited) => {
                        return Err(EngineError::AgentNotFound(agent_id))
                    }
                    _ => {}
                }
                changed.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| EngineError::Transport(format!("agent {} did not connect", agent_id)))?
    }

    fn client(&self, agent_id: Uuid) -> Result<Arc<AgentClient>> {
        self.registry
            .clients
            .get(&agent_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or(EngineError::AgentNotFound(agent_id))
    }

    /// Run a request on one agent; a busy agent is reported, not waited for
    pub async fn run(&self, agent_id: Uuid, request: RunRequest) -> Result<RunResult> {
        let client = self.client(agent_id)?;
        self.registry.observe(agent_id, |record| {
            record.mark_running();
            record.liveness
        });
        let result = client.run(request).await;
        self.registry.observe(agent_id, |record| {
            record.mark_idle();
            record.liveness
        });
        result
    }

    /// Ask an agent to stop; terminate it if it has not exited in time
    pub async fn stop_agent(&self, agent_id: Uuid) -> Result<()> {
        if !self.registry.records.contains_key(&agent_id) {
            return Err(EngineError::AgentNotFound(agent_id));
        }
        self.registry.observe(agent_id, |record| {
            record.mark_stopping();
            record.liveness
        });

        if let Ok(client) = self.client(agent_id) {
            if let Err(e) = client.stop().await {
                debug!(%agent_id, "Stop command not acknowledged: {}", e);
            }
        }

        if self.wait_for_exit(agent_id, self.settings.stop_timeout()).await {
            return Ok(());
        }

        warn!(%agent_id, "Agent did not stop in time, terminating it");
        if let Some((_, kill)) = self.registry.killers.remove(&agent_id) {
            let _ = kill.send(());
        }
        if let Ok(client) = self.client(agent_id) {
            client.close().await;
        }
        if !self.wait_for_exit(agent_id, self.processes.kill_grace() + self.settings.stop_timeout()).await {
            warn!(%agent_id, "Agent still tracked after termination");
        }
        Ok(())
    }

    /// Run a whole package as the runner factory decides: in this process,
    /// or on one agent per planned sub-package, each stopped after its run
    pub async fn run_package(&self, package: &TestPackage, launch: AgentLaunch) -> Result<Vec<RunResult>> {
        let runner = self.runner_factory()?.make_runner(package);
        info!(
            topology = runner.topology().name(),
            in_process = runner.is_in_process(),
            agents = runner.agent_packages().len(),
            "Running package"
        );

        if runner.is_in_process() {
            return Ok(vec![self.run_in_process(&runner).await?]);
        }

        let mut results = Vec::with_capacity(runner.agent_packages().len());
        for sub_package in runner.agent_packages() {
            let agent_id = self.launch_agent(launch.clone())?;
            let outcome = async {
                let client = self.wait_for_connection(agent_id, self.settings.request_timeout()).await?;
                self.run(client.agent_id(), RunRequest::new(sub_package.clone())).await
            }
            .await;

            if let Err(e) = self.stop_agent(agent_id).await {
                debug!(%agent_id, "Agent already gone: {}", e);
            }
            results.push(outcome?);
        }
        Ok(results)
    }

    /// One execution per domain; the result carries the nil agent id
    async fn run_in_process(&self, runner: &TestRunner) -> Result<RunResult> {
        let mut assemblies = Vec::new();
        for domain in runner.domains() {
            debug!(domain = %domain.name, "Running domain in process");
            let package = TestPackage {
                assemblies: domain.assemblies,
                settings: runner.package().settings.clone(),
            };
            let result = self.executor.execute(Uuid::nil(), RunRequest::new(package)).await?;
            assemblies.extend(result.assemblies);
        }
        Ok(RunResult {
            agent_id: Uuid::nil(),
            assemblies,
        })
    }

    /// True once the agent's record is gone
    pub async fn wait_for_exit(&self, agent_id: Uuid, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let changed = self.registry.changed.notified();
                if !self.registry.records.contains_key(&agent_id) {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Stop every agent and the listener
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.registry.records.iter().map(|r| *r.key()).collect();
        for agent_id in ids {
            if let Err(e) = self.stop_agent(agent_id).await {
                warn!(%agent_id, "Failed to stop agent: {}", e);
            }
        }
        self.listener_task.abort();
        for (name, e) in self.services.lock().stop_services() {
            warn!("Service {} did not stop cleanly: {}", name, e);
        }
    }
}

impl Drop for TestAgency {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runners::package::{DOMAIN_USAGE, PROCESS_MODEL};
    use crate::transport::protocol::TestStatus;

    async fn agency_with(config: EngineConfig, executable: &str) -> TestAgency {
        TestAgency::start(&config, ProcessManager::new(executable)).await.unwrap()
    }

    async fn agency(executable: &str) -> TestAgency {
        agency_with(EngineConfig::default(), executable).await
    }

    #[tokio::test]
    async fn test_binds_ephemeral_port() {
        let agency = agency("true").await;
        match agency.endpoint() {
            AgencyEndpoint::Tcp(address) => assert!(!address.ends_with(":0")),
            other => panic!("unexpected endpoint {}", other),
        }
    }

    #[tokio::test]
    async fn test_agent_that_never_connects_is_dropped_on_exit() {
        // `true` ignores its arguments and exits at once
        let agency = agency("true").await;
        let agent_id = agency.launch_agent(AgentLaunch::default()).unwrap();
        assert!(agency.wait_for_exit(agent_id, Duration::from_secs(5)).await);
        assert_eq!(agency.agent_count(), 0);
        assert!(agency
            .wait_for_connection(agent_id, Duration::from_millis(100))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_in_process_package_runs_on_agency_executor() {
        // a nonexistent agent executable proves no agent is launched
        let agency = agency("/nonexistent/agency-agent").await;
        let package = TestPackage::new(["false", "true"]).with_setting(PROCESS_MODEL, "InProcess");

        let results = agency.run_package(&package, AgentLaunch::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].agent_id, Uuid::nil());
        let statuses: Vec<TestStatus> = results[0].assemblies.iter().map(|a| a.status).collect();
        assert_eq!(statuses, vec![TestStatus::Failed, TestStatus::Passed]);
        assert!(!results[0].passed());
    }

    #[tokio::test]
    async fn test_domain_usage_none_launches_no_agent() {
        let agency = agency("/nonexistent/agency-agent").await;
        let package = TestPackage::new(["true"]).with_setting(DOMAIN_USAGE, "None");

        let results = agency.run_package(&package, AgentLaunch::default()).await.unwrap();
        assert!(results[0].passed());
        assert_eq!(agency.agent_count(), 0);
    }

    #[tokio::test]
    async fn test_process_isolation_setting_reaches_runner_factory() {
        let mut config = EngineConfig::default();
        config.runner.process_isolation = false;
        let agency = agency_with(config, "/nonexistent/agency-agent").await;

        let package = TestPackage::new(["true", "true"]);
        assert!(agency.runner_factory().unwrap().make_runner(&package).is_in_process());
        let results = agency.run_package(&package, AgentLaunch::default()).await.unwrap();
        assert_eq!(results[0].assemblies.len(), 2);
    }

    #[tokio::test]
    async fn test_isolated_package_needs_an_agent() {
        let agency = agency("/nonexistent/agency-agent").await;
        let package = TestPackage::new(["true"]);
        assert!(matches!(
            agency.run_package(&package, AgentLaunch::default()).await,
            Err(EngineError::ProcessSpawnFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_package_fails_when_agent_never_connects() {
        let agency = agency("true").await;
        let package = TestPackage::new(["a.bin"]);
        assert!(agency.run_package(&package, AgentLaunch::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_runnable() {
        let agency = agency("true").await;
        let request = RunRequest::new(TestPackage::new(["x"]));
        assert!(matches!(
            agency.run(Uuid::new_v4(), request).await,
            Err(EngineError::AgentNotFound(_))
        ));
        assert!(matches!(
            agency.stop_agent(Uuid::new_v4()).await,
            Err(EngineError::AgentNotFound(_))
        ));
    }
}
