// packages/engine/src/agent/host.rs
//! Agent process lifecycle
//!
//! ```text
//! Launching → LocatingParent → Running → Stopping → Exited
//! ```
//!
//! [`run_agent`] drives the whole lifecycle and always returns one of the
//! documented [`AgentExitCode`]s; errors and panics are caught here, logged,
//! and mapped. Every collaborator comes in through [`AgentEnvironment`] so the
//! lifecycle can run against fake parents and transports.

use crate::agent::debugger::{self, DebuggerAttach, OsDebugger};
use crate::agent::executor::{ProcessExecutor, TestExecutor};
use crate::agent::exit_codes::AgentExitCode;
use crate::agent::launch::LaunchOptions;
use crate::agent::parent::{OsProcessLocator, ParentProcess, ProcessLocator};
use crate::agent::remote_agent::RemoteTestAgent;
use crate::observability;
use crate::services::{ExtensionService, ServiceContext};
use crate::transport::{DefaultTransportFactory, TransportFactory};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where the agent writes its log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    /// `<work-dir>/<prefix>_<pid>.log`
    File,
    /// Leave the global subscriber alone
    Inherit,
}

/// Collaborators of one agent process
#[derive(Clone)]
pub struct AgentEnvironment {
    pub config: EngineConfig,
    pub transports: Arc<dyn TransportFactory>,
    pub locator: Arc<dyn ProcessLocator>,
    pub debugger: Arc<dyn DebuggerAttach>,
    pub executor: Arc<dyn TestExecutor>,
    pub log_sink: LogSink,
}

impl AgentEnvironment {
    /// The real operating-system collaborators
    pub fn os(config: EngineConfig) -> Self {
        let transports = DefaultTransportFactory::new(config.agent.connect_timeout());
        let executor = ProcessExecutor::new(config.agency.request_timeout());
        Self {
            config,
            transports: Arc::new(transports),
            locator: Arc::new(OsProcessLocator),
            debugger: Arc::new(OsDebugger),
            executor: Arc::new(executor),
            log_sink: LogSink::File,
        }
    }

    pub fn with_transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = transports;
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn ProcessLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_debugger(mut self, debugger: Arc<dyn DebuggerAttach>) -> Self {
        self.debugger = debugger;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn TestExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_log_sink(mut self, log_sink: LogSink) -> Self {
        self.log_sink = log_sink;
        self
    }
}

/// Run an agent process to completion
///
/// `args` are the command-line arguments after the program name.
pub async fn run_agent<S: AsRef<str>>(args: &[S], env: AgentEnvironment) -> AgentExitCode {
    match AssertUnwindSafe(launch(args, env)).catch_unwind().await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            error!("Agent failed: {}", e);
            e.exit_code()
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Unexpected fault in agent: {}", message);
            AgentExitCode::UnexpectedException
        }
    }
}

async fn launch<S: AsRef<str>>(args: &[S], env: AgentEnvironment) -> Result<AgentExitCode> {
    // Launching
    let options = LaunchOptions::parse(args)?;
    let pid = std::process::id();

    if env.log_sink == LogSink::File {
        let path = options.log_path(&env.config.agent.log_file_prefix, pid);
        observability::init_file_tracing(options.trace_level.level_filter(), &path)?;
    }
    if let Some(rejected) = &options.rejected_trace {
        warn!("Unknown trace level '{}', tracing is off", rejected);
    }

    if options.debug_agent {
        if let Err(e) = debugger::try_attach(env.debugger.as_ref()) {
            error!("{}", e);
            if env.config.agent.debugger_failure_fatal {
                return Ok(e.exit_code());
            }
            warn!("Continuing without a debugger");
        }
    }

    // LocatingParent
    let parent_pid = options
        .parent_pid
        .ok_or_else(|| EngineError::InvalidArguments("--pid is required".into()))?;
    let parent = env.locator.locate(parent_pid).map_err(|e| {
        error!("Unable to locate agency process with PID {}", parent_pid);
        e
    })?;

    info!(pid, agent_id = %options.agent_id, agency = %options.agency, "Agent process starting");

    let mut services = ServiceContext::new();
    services.add(ExtensionService::new(env.config.extensions.directories.clone()))?;
    info!("Initializing services");
    let report = services.start_services()?;
    for (name, message) in &report.failed {
        warn!("Service {} failed to start: {}", name, message);
    }

    let mut host = AgentHost {
        options,
        parent,
        services,
        poll_interval: env.config.agent.poll_interval(),
    };
    let code = host.run(&env).await;
    host.shutdown();
    Ok(code)
}

/// Everything the running agent owns
struct AgentHost {
    options: LaunchOptions,
    parent: Box<dyn ParentProcess>,
    services: ServiceContext,
    poll_interval: Duration,
}

impl AgentHost {
    async fn run(&mut self, env: &AgentEnvironment) -> AgentExitCode {
        info!("Starting remote test agent");
        let agent = RemoteTestAgent::new(self.options.agent_id, Arc::clone(&env.executor));

        let transport = match env.transports.create(self.options.agent_id, &self.options.agency) {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to create transport: {}", e);
                return AgentExitCode::FailedToStartRemoteAgent;
            }
        };
        if !agent.start(transport).await {
            error!("Failed to start remote test agent");
            return AgentExitCode::FailedToStartRemoteAgent;
        }

        supervise(self.parent.as_ref(), self.poll_interval, &agent).await
    }

    fn shutdown(&mut self) {
        for (name, e) in self.services.stop_services() {
            warn!("Service {} did not stop cleanly: {}", name, e);
        }
    }
}

/// Poll for the stop signal, checking the agency process on every tick
async fn supervise(parent: &dyn ParentProcess, poll_interval: Duration, agent: &RemoteTestAgent) -> AgentExitCode {
    debug!("Waiting for stop signal");
    while !agent.wait_for_stop(poll_interval).await {
        if parent.has_exited() {
            error!(parent_pid = parent.pid(), "Parent process has been terminated");
            agent.stop();
            return AgentExitCode::ParentProcessTerminated;
        }
        if poll_interval.is_zero() {
            tokio::task::yield_now().await;
        }
    }
    debug!("Stop signal received");
    info!(pid = std::process::id(), "Agent process exiting cleanly");
    AgentExitCode::Ok
}
