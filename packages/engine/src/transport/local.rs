// packages/engine/src/transport/local.rs
//! In-process transport binding
//!
//! Agencies that host their agents inside the same process register a name
//! with a [`LocalBinding`] and accept connections from a [`LocalAgencyPort`].
//! Agents reach it through a [`LocalTransport`] holding the same binding.
//! Messages move over paired unbounded channels, so ordering is FIFO.

use crate::transport::protocol::{AgentCommand, AgentReply, Envelope};
use crate::transport::{AgentConnection, CommandSink, ReplySource, Transport, TransportKind};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

/// Registry of named in-process agency endpoints
#[derive(Clone, Default)]
pub struct LocalBinding {
    endpoints: Arc<Mutex<HashMap<String, UnboundedSender<AgentConnection>>>>,
}

impl LocalBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`; fails if another live port already owns it
    pub fn bind(&self, name: &str) -> Result<LocalAgencyPort> {
        let mut endpoints = self.endpoints.lock();
        if endpoints.get(name).is_some_and(|tx| !tx.is_closed()) {
            return Err(EngineError::Transport(format!("local endpoint '{}' already bound", name)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        endpoints.insert(name.to_string(), tx);
        debug!("Bound local endpoint '{}'", name);

        Ok(LocalAgencyPort {
            name: name.to_string(),
            incoming: rx,
            binding: self.clone(),
        })
    }

    fn connect(&self, name: &str, connection: AgentConnection) -> bool {
        let endpoints = self.endpoints.lock();
        match endpoints.get(name) {
            Some(tx) => tx.send(connection).is_ok(),
            None => false,
        }
    }

    fn unbind(&self, name: &str) {
        self.endpoints.lock().remove(name);
    }
}

/// Agency side of a local endpoint
pub struct LocalAgencyPort {
    name: String,
    incoming: UnboundedReceiver<AgentConnection>,
    binding: LocalBinding,
}

impl LocalAgencyPort {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next connecting agent; `None` once the binding is gone
    pub async fn accept(&mut self) -> Option<AgentConnection> {
        self.incoming.recv().await
    }
}

impl Drop for LocalAgencyPort {
    fn drop(&mut self) {
        self.binding.unbind(&self.name);
    }
}

/// Agent side of the local binding
pub struct LocalTransport {
    agent_id: Uuid,
    name: String,
    binding: LocalBinding,
    link: Option<(UnboundedReceiver<Envelope<AgentCommand>>, UnboundedSender<Envelope<AgentReply>>)>,
    closed: bool,
}

impl LocalTransport {
    pub fn new(agent_id: Uuid, name: impl Into<String>, binding: LocalBinding) -> Self {
        Self {
            agent_id,
            name: name.into(),
            binding,
            link: None,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    async fn start(&mut self) -> bool {
        if self.link.is_some() {
            return true;
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let connection = AgentConnection {
            agent_id: self.agent_id,
            commands: Box::new(LocalCommandSink { tx: Some(command_tx) }),
            replies: Box::new(LocalReplySource { rx: reply_rx }),
        };

        if !self.binding.connect(&self.name, connection) {
            debug!(agent_id = %self.agent_id, "No local agency bound as '{}'", self.name);
            return false;
        }

        self.link = Some((command_rx, reply_tx));
        self.closed = false;
        true
    }

    async fn stop(&mut self) {
        self.link = None;
        self.closed = true;
    }

    async fn receive(&mut self) -> Option<Envelope<AgentCommand>> {
        let (rx, _) = self.link.as_mut()?;
        let command = rx.recv().await;
        if command.is_none() {
            self.link = None;
            self.closed = true;
        }
        command
    }

    async fn send(&mut self, reply: Envelope<AgentReply>) -> bool {
        let Some((_, tx)) = self.link.as_ref() else {
            return false;
        };
        if tx.send(reply).is_err() {
            self.link = None;
            self.closed = true;
            return false;
        }
        true
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

struct LocalCommandSink {
    tx: Option<UnboundedSender<Envelope<AgentCommand>>>,
}

#[async_trait]
impl CommandSink for LocalCommandSink {
    async fn send(&mut self, command: Envelope<AgentCommand>) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(EngineError::TransportClosed)?;
        tx.send(command).map_err(|_| EngineError::TransportClosed)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

struct LocalReplySource {
    rx: UnboundedReceiver<Envelope<AgentReply>>,
}

#[async_trait]
impl ReplySource for LocalReplySource {
    async fn recv(&mut self) -> Result<Option<Envelope<AgentReply>>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_fails_without_bound_endpoint() {
        let binding = LocalBinding::new();
        let mut transport = LocalTransport::new(Uuid::new_v4(), "missing", binding);
        assert!(!transport.start().await);
    }

    #[tokio::test]
    async fn test_duplicate_bind_rejected_until_port_dropped() {
        let binding = LocalBinding::new();
        let port = binding.bind("suite").unwrap();
        assert!(binding.bind("suite").is_err());
        drop(port);
        assert!(binding.bind("suite").is_ok());
    }

    #[tokio::test]
    async fn test_exchange_over_binding() {
        let binding = LocalBinding::new();
        let mut port = binding.bind("suite").unwrap();
        let agent_id = Uuid::new_v4();
        let mut transport = LocalTransport::new(agent_id, "suite", binding.clone());
        assert!(transport.start().await);

        let mut connection = port.accept().await.unwrap();
        assert_eq!(connection.agent_id, agent_id);

        connection.commands.send(Envelope::new(1, AgentCommand::Ping)).await.unwrap();
        assert_eq!(transport.receive().await.unwrap().body, AgentCommand::Ping);

        assert!(transport.send(Envelope::new(1, AgentReply::Pong)).await);
        let reply = connection.replies.recv().await.unwrap().unwrap();
        assert_eq!(reply, Envelope::new(1, AgentReply::Pong));

        connection.commands.close().await;
        assert!(transport.receive().await.is_none());
        assert!(transport.is_closed());
    }
}
