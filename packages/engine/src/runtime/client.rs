// packages/engine/src/runtime/client.rs
//! Agency-side handle to one connected agent
//!
//! Requests get increasing envelope ids; a reader task hands each reply to
//! whoever is waiting for that id. When the connection ends every waiter is
//! released with [`EngineError::TransportClosed`].

use crate::transport::protocol::{AgentCommand, AgentReply, Envelope, RunRequest, RunResult};
use crate::transport::{AgentConnection, CommandSink, ReplySource};
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<AgentReply>>>>;

pub struct AgentClient {
    agent_id: Uuid,
    commands: tokio::sync::Mutex<Box<dyn CommandSink>>,
    pending: Pending,
    next_id: AtomicU64,
    closed: CancellationToken,
    request_timeout: Duration,
}

impl AgentClient {
    /// Take over a connection and start routing its replies
    pub fn spawn(connection: AgentConnection, request_timeout: Duration) -> Arc<Self> {
        let pending: Pending = Arc::default();
        let closed = CancellationToken::new();
        let client = Arc::new(Self {
            agent_id: connection.agent_id,
            commands: tokio::sync::Mutex::new(connection.commands),
            pending: Arc::clone(&pending),
            next_id: AtomicU64::new(1),
            closed: closed.clone(),
            request_timeout,
        });

        let agent_id = connection.agent_id;
        tokio::spawn(route_replies(agent_id, connection.replies, pending, closed));
        client
    }

    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves when the connection has ended
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub async fn request(&self, command: AgentCommand) -> Result<AgentReply> {
        if self.is_closed() {
            return Err(EngineError::TransportClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.commands.lock().await.send(Envelope::new(id, command)).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(EngineError::TransportClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(EngineError::ExecutionTimeout)
            }
        }
    }

    pub async fn ping(&self) -> Result<()> {
        match self.request(AgentCommand::Ping).await? {
            AgentReply::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn run(&self, request: RunRequest) -> Result<RunResult> {
        match self.request(AgentCommand::Run(request)).await? {
            AgentReply::Result(result) => Ok(result),
            AgentReply::Busy { in_flight } => Err(EngineError::AgentBusy { in_flight }),
            AgentReply::Failed { message } => Err(EngineError::RuntimeError(message)),
            other => Err(unexpected(other)),
        }
    }

    /// Ask the agent to stop; it acknowledges before closing
    pub async fn stop(&self) -> Result<()> {
        match self.request(AgentCommand::Stop).await? {
            AgentReply::Stopping => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn close(&self) {
        self.commands.lock().await.close().await;
    }
}

fn unexpected(reply: AgentReply) -> EngineError {
    EngineError::Transport(format!("unexpected reply {:?}", reply))
}

async fn route_replies(
    agent_id: Uuid,
    mut replies: Box<dyn ReplySource>,
    pending: Pending,
    closed: CancellationToken,
) {
    loop {
        match replies.recv().await {
            Ok(Some(reply)) => match pending.lock().remove(&reply.id) {
                Some(waiter) => {
                    let _ = waiter.send(reply.body);
                }
                None => debug!(%agent_id, id = reply.id, "Dropping reply nobody waits for"),
            },
            Ok(None) => {
                debug!(%agent_id, "Agent connection closed");
                break;
            }
            Err(e) => {
                warn!(%agent_id, "Agent connection failed: {}", e);
                break;
            }
        }
    }
    // dropping the senders releases every waiter
    pending.lock().clear();
    closed.cancel();
}
