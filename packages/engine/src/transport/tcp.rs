// packages/engine/src/transport/tcp.rs
//! TCP transport
//!
//! The agent connects to the agency, announces itself with a `Register`
//! frame, and then serves commands on the same connection. Frames on one
//! connection are delivered in the order they were written.

use crate::transport::codec::{FrameReader, FrameWriter};
use crate::transport::protocol::{AgentCommand, AgentReply, Envelope, HANDSHAKE_ID};
use crate::transport::{AgencyEndpoint, AgentConnection, CommandSink, ReplySource, Transport, TransportKind};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

type AgentReader = FrameReader<Envelope<AgentCommand>, OwnedReadHalf>;
type AgentWriter = FrameWriter<Envelope<AgentReply>, OwnedWriteHalf>;

/// Agent side of a TCP connection
pub struct TcpTransport {
    agent_id: Uuid,
    address: String,
    connect_timeout: Duration,
    link: Option<(AgentReader, AgentWriter)>,
    closed: bool,
}

impl TcpTransport {
    pub fn new(agent_id: Uuid, address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            agent_id,
            address: address.into(),
            connect_timeout,
            link: None,
            closed: false,
        }
    }

    async fn connect(&self) -> Result<(AgentReader, AgentWriter)> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| EngineError::Transport(format!("timed out connecting to {}", self.address)))??;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        let reader = FrameReader::new(read);
        let mut writer = FrameWriter::new(write);

        let hello = Envelope::new(HANDSHAKE_ID, AgentReply::Register { agent_id: self.agent_id });
        writer.send(&hello).await?;

        Ok((reader, writer))
    }

    fn mark_closed(&mut self) {
        self.link = None;
        self.closed = true;
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn start(&mut self) -> bool {
        if self.link.is_some() {
            return true;
        }

        match self.connect().await {
            Ok(link) => {
                info!(agent_id = %self.agent_id, address = %self.address, "Connected to agency");
                self.link = Some(link);
                self.closed = false;
                true
            }
            Err(e) => {
                warn!(agent_id = %self.agent_id, address = %self.address, "Failed to connect to agency: {}", e);
                false
            }
        }
    }

    async fn stop(&mut self) {
        if let Some((_, mut writer)) = self.link.take() {
            debug!(agent_id = %self.agent_id, "Closing TCP transport");
            if let Err(e) = writer.close().await {
                debug!("Error while closing TCP transport: {}", e);
            }
        }
        self.closed = true;
    }

    async fn receive(&mut self) -> Option<Envelope<AgentCommand>> {
        let (reader, _) = self.link.as_mut()?;
        match reader.recv().await {
            Ok(Some(command)) => Some(command),
            Ok(None) => {
                debug!(agent_id = %self.agent_id, "Agency closed the connection");
                self.mark_closed();
                None
            }
            Err(e) => {
                warn!(agent_id = %self.agent_id, "TCP transport read failed: {}", e);
                self.mark_closed();
                None
            }
        }
    }

    async fn send(&mut self, reply: Envelope<AgentReply>) -> bool {
        let Some((_, writer)) = self.link.as_mut() else {
            return false;
        };
        match writer.send(&reply).await {
            Ok(()) => true,
            Err(e) => {
                warn!(agent_id = %self.agent_id, "TCP transport write failed: {}", e);
                self.mark_closed();
                false
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Agency side: accepts agent connections
pub struct TcpAgencyListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpAgencyListener {
    pub async fn bind(address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        info!("Agency listening on {}", local_addr);
        Ok(Self { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address handed to agents on their command line
    pub fn endpoint(&self) -> AgencyEndpoint {
        AgencyEndpoint::Tcp(self.local_addr.to_string())
    }

    /// Accept the next agent and read its `Register` handshake
    pub async fn accept(&self, handshake_timeout: Duration) -> Result<AgentConnection> {
        self.accept_pending().await?.handshake(handshake_timeout).await
    }

    /// Accept the next TCP connection without waiting for its handshake
    pub async fn accept_pending(&self) -> Result<PendingAgent> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(PendingAgent { stream, peer })
    }
}

/// A connection that has not registered yet
pub struct PendingAgent {
    stream: TcpStream,
    peer: SocketAddr,
}

impl PendingAgent {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Read the `Register` frame that identifies the agent
    pub async fn handshake(self, timeout: Duration) -> Result<AgentConnection> {
        let peer = self.peer;
        let (read, write) = self.stream.into_split();
        let mut reader = FrameReader::<Envelope<AgentReply>, _>::new(read);

        let hello = tokio::time::timeout(timeout, reader.recv())
            .await
            .map_err(|_| EngineError::Transport(format!("no handshake from {}", peer)))??;

        match hello {
            Some(Envelope { body: AgentReply::Register { agent_id }, .. }) => {
                debug!(%agent_id, %peer, "Agent registered");
                Ok(AgentConnection {
                    agent_id,
                    commands: Box::new(TcpCommandSink { writer: FrameWriter::new(write) }),
                    replies: Box::new(TcpReplySource { reader }),
                })
            }
            Some(other) => Err(EngineError::Transport(format!(
                "expected registration from {}, got {:?}",
                peer, other.body
            ))),
            None => Err(EngineError::TransportClosed),
        }
    }
}

struct TcpCommandSink {
    writer: FrameWriter<Envelope<AgentCommand>, OwnedWriteHalf>,
}

#[async_trait]
impl CommandSink for TcpCommandSink {
    async fn send(&mut self, command: Envelope<AgentCommand>) -> Result<()> {
        self.writer.send(&command).await
    }

    async fn close(&mut self) {
        let _ = self.writer.close().await;
    }
}

struct TcpReplySource {
    reader: FrameReader<Envelope<AgentReply>, OwnedReadHalf>,
}

#[async_trait]
impl ReplySource for TcpReplySource {
    async fn recv(&mut self) -> Result<Option<Envelope<AgentReply>>> {
        self.reader.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_fails_when_nothing_listens() {
        // bind then drop to get a port that refuses connections
        let address = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let mut transport = TcpTransport::new(Uuid::new_v4(), address, Duration::from_millis(500));
        assert!(!transport.start().await);
        assert!(transport.receive().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut transport = TcpTransport::new(Uuid::new_v4(), "127.0.0.1:1", Duration::from_millis(10));
        transport.stop().await;
        transport.stop().await;
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_handshake_identifies_agent() {
        let listener = TcpAgencyListener::bind("127.0.0.1:0").await.unwrap();
        let agent_id = Uuid::new_v4();
        let mut transport =
            TcpTransport::new(agent_id, listener.local_addr().to_string(), Duration::from_secs(2));

        let (started, connection) = tokio::join!(
            transport.start(),
            listener.accept(Duration::from_secs(2))
        );
        assert!(started);
        assert_eq!(connection.unwrap().agent_id, agent_id);
    }

    #[tokio::test]
    async fn test_agency_close_surfaces_as_stop() {
        let listener = TcpAgencyListener::bind("127.0.0.1:0").await.unwrap();
        let mut transport =
            TcpTransport::new(Uuid::new_v4(), listener.local_addr().to_string(), Duration::from_secs(2));
        let (started, connection) = tokio::join!(
            transport.start(),
            listener.accept(Duration::from_secs(2))
        );
        assert!(started);
        drop(connection.unwrap());

        assert!(transport.receive().await.is_none());
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_silent_peer_does_not_hold_up_others() {
        let listener = TcpAgencyListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().to_string();

        let _silent = TcpStream::connect(&address).await.unwrap();
        let stalled = listener.accept_pending().await.unwrap();

        let agent_id = Uuid::new_v4();
        let mut transport = TcpTransport::new(agent_id, address, Duration::from_secs(2));
        let (started, pending) = tokio::join!(transport.start(), listener.accept_pending());
        assert!(started);

        let connection = pending.unwrap().handshake(Duration::from_secs(2)).await.unwrap();
        assert_eq!(connection.agent_id, agent_id);
        assert!(stalled.handshake(Duration::from_millis(50)).await.is_err());
    }
}
