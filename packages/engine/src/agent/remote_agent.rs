// packages/engine/src/agent/remote_agent.rs
//! Remote test agent
//!
//! The unit the agency drives over a transport. Commands arrive on the
//! transport, runs are handed to the [`TestExecutor`], and results go back
//! on the same transport tagged with the command id.
//!
//! At most one run is in flight: the guard is a single-permit semaphore and
//! a second run is answered with `Busy` instead of being queued, so the
//! agency can schedule it elsewhere.

use crate::agent::executor::TestExecutor;
use crate::transport::protocol::{AgentCommand, AgentReply, Envelope, RunRequest, RunResult};
use crate::transport::Transport;
use crate::utils::errors::{EngineError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Running,
    Stopped,
}

pub struct RemoteTestAgent {
    id: Uuid,
    executor: Arc<dyn TestExecutor>,
    run_slot: Arc<Semaphore>,
    in_flight: AtomicU64,
    state: Arc<watch::Sender<AgentState>>,
    stop: CancellationToken,
}

/// Held while a run executes; frees the slot on drop
struct RunGuard {
    _permit: OwnedSemaphorePermit,
    state: Arc<watch::Sender<AgentState>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            if *state == AgentState::Running {
                *state = AgentState::Idle;
                true
            } else {
                false
            }
        });
    }
}

impl RemoteTestAgent {
    pub fn new(id: Uuid, executor: Arc<dyn TestExecutor>) -> Arc<Self> {
        let (state, _) = watch::channel(AgentState::Idle);
        Arc::new(Self {
            id,
            executor,
            run_slot: Arc::new(Semaphore::new(1)),
            in_flight: AtomicU64::new(0),
            state: Arc::new(state),
            stop: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Start the transport and serve commands in the background
    pub async fn start(self: &Arc<Self>, mut transport: Box<dyn Transport>) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        if !transport.start().await {
            warn!(agent_id = %self.id, "Transport failed to start");
            return false;
        }

        info!(agent_id = %self.id, kind = ?transport.kind(), "Remote test agent started");
        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.serve(transport).await });
        true
    }

    /// Signal stop; idempotent
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            debug!(agent_id = %self.id, "Stop requested");
        }
        self.state.send_replace(AgentState::Stopped);
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// True once stop was signalled; false if `timeout` elapsed first
    pub async fn wait_for_stop(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.stop.is_cancelled();
        }
        tokio::time::timeout(timeout, self.stop.cancelled()).await.is_ok()
    }

    /// Execute a run request, rejecting it if another is in flight
    pub async fn run(&self, request_id: u64, request: RunRequest) -> Result<RunResult> {
        let guard = self.try_begin(request_id)?;
        let result = self.executor.execute(self.id, request).await;
        drop(guard);
        result
    }

    fn try_begin(&self, request_id: u64) -> Result<RunGuard> {
        if self.is_stopped() {
            return Err(EngineError::RuntimeError("agent is stopped".into()));
        }
        let permit = Arc::clone(&self.run_slot).try_acquire_owned().map_err(|_| {
            metrics::counter!("agency_agent_requests_rejected_total").increment(1);
            EngineError::AgentBusy {
                in_flight: self.in_flight.load(Ordering::SeqCst),
            }
        })?;

        metrics::counter!("agency_agent_requests_total").increment(1);
        self.in_flight.store(request_id, Ordering::SeqCst);
        self.state.send_replace(AgentState::Running);
        Ok(RunGuard {
            _permit: permit,
            state: Arc::clone(&self.state),
        })
    }

    async fn serve(self: Arc<Self>, mut transport: Box<dyn Transport>) {
        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<Envelope<AgentReply>>();

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                Some(reply) = results_rx.recv() => {
                    if !transport.send(reply).await {
                        warn!(agent_id = %self.id, "Transport closed while sending a result");
                        break;
                    }
                }
                command = transport.receive() => {
                    let Some(command) = command else {
                        warn!(agent_id = %self.id, "Transport closed; stopping agent");
                        break;
                    };
                    let stop_after = command.body == AgentCommand::Stop;
                    if let Some(reply) = self.dispatch(command, &results_tx) {
                        if !transport.send(reply).await {
                            break;
                        }
                    }
                    if stop_after {
                        break;
                    }
                }
            }
        }

        transport.stop().await;
        self.stop();
    }

    /// Immediate reply, if the command has one
    fn dispatch(
        self: &Arc<Self>,
        command: Envelope<AgentCommand>,
        results: &mpsc::UnboundedSender<Envelope<AgentReply>>,
    ) -> Option<Envelope<AgentReply>> {
        let id = command.id;
        match command.body {
            AgentCommand::Ping => Some(Envelope::new(id, AgentReply::Pong)),
            AgentCommand::Stop => {
                info!(agent_id = %self.id, "Stop command received");
                Some(Envelope::new(id, AgentReply::Stopping))
            }
            AgentCommand::Run(request) => match self.try_begin(id) {
                Ok(guard) => {
                    debug!(agent_id = %self.id, request = id, "Run accepted");
                    let agent = Arc::clone(self);
                    let results = results.clone();
                    tokio::spawn(async move {
                        let outcome = agent.executor.execute(agent.id, request).await;
                        // free the slot before the agency can see the result
                        drop(guard);
                        let body = match outcome {
                            Ok(result) => AgentReply::Result(result),
                            Err(e) => AgentReply::Failed { message: e.to_string() },
                        };
                        let _ = results.send(Envelope::new(id, body));
                    });
                    None
                }
                Err(EngineError::AgentBusy { in_flight }) => {
                    debug!(agent_id = %self.id, request = id, in_flight, "Run rejected, agent busy");
                    Some(Envelope::new(id, AgentReply::Busy { in_flight }))
                }
                Err(e) => Some(Envelope::new(id, AgentReply::Failed { message: e.to_string() })),
            },
        }
    }
}
