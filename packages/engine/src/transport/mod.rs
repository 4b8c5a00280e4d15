// packages/engine/src/transport/mod.rs
//! Agent ↔ agency transports
//!
//! An agent holds exactly one [`Transport`] and does not know which
//! implementation it is. The launcher picks one at runtime through a
//! [`TransportFactory`], usually from the scheme of the agency address:
//!
//! - **tcp**: length-prefixed JSON frames over a TCP connection
//! - **local**: the in-process binding, for agencies that host agents in the
//!   same process
//!
//! On the agency side each accepted agent becomes an [`AgentConnection`],
//! a command sink plus a reply source, regardless of transport.

pub mod codec;
pub mod local;
pub mod protocol;
pub mod tcp;

use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub use local::{LocalAgencyPort, LocalBinding, LocalTransport};
pub use protocol::{AgentCommand, AgentReply, Envelope, RunRequest, RunResult};
pub use tcp::{PendingAgent, TcpAgencyListener, TcpTransport};

/// Where an agent connects back to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgencyEndpoint {
    /// `host:port`
    Tcp(String),
    /// Name registered with a [`LocalBinding`]
    Local(String),
}

impl FromStr for AgencyEndpoint {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(name) = s.strip_prefix("local://") {
            if name.is_empty() {
                return Err(EngineError::InvalidEndpoint(s.to_string()));
            }
            return Ok(AgencyEndpoint::Local(name.to_string()));
        }

        let address = s.strip_prefix("tcp://").unwrap_or(s);
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(AgencyEndpoint::Tcp(address.to_string()))
            }
            _ => Err(EngineError::InvalidEndpoint(s.to_string())),
        }
    }
}

impl fmt::Display for AgencyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgencyEndpoint::Tcp(address) => write!(f, "tcp://{}", address),
            AgencyEndpoint::Local(name) => write!(f, "local://{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Local,
}

/// Agent-side channel to the agency
///
/// `start` returns false instead of failing when the agency refuses or does
/// not answer in time. Once started, I/O errors close the transport and show
/// up as `receive` returning `None` or `send` returning false. `receive` is
/// cancel safe so it can sit in a `select!` loop.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    async fn start(&mut self) -> bool;

    /// Best-effort close; a no-op when never started or already stopped
    async fn stop(&mut self);

    async fn receive(&mut self) -> Option<Envelope<AgentCommand>>;

    async fn send(&mut self, reply: Envelope<AgentReply>) -> bool;

    fn is_closed(&self) -> bool;
}

/// Builds the transport an agent uses
pub trait TransportFactory: Send + Sync {
    fn create(&self, agent_id: Uuid, endpoint: &AgencyEndpoint) -> Result<Box<dyn Transport>>;
}

/// Picks the transport from the endpoint scheme
#[derive(Clone)]
pub struct DefaultTransportFactory {
    connect_timeout: Duration,
    local: Option<LocalBinding>,
}

impl DefaultTransportFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            local: None,
        }
    }

    /// Also serve `local://` endpoints through this binding
    pub fn with_local_binding(mut self, binding: LocalBinding) -> Self {
        self.local = Some(binding);
        self
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, agent_id: Uuid, endpoint: &AgencyEndpoint) -> Result<Box<dyn Transport>> {
        match endpoint {
            AgencyEndpoint::Tcp(address) => Ok(Box::new(TcpTransport::new(
                agent_id,
                address.clone(),
                self.connect_timeout,
            ))),
            AgencyEndpoint::Local(name) => {
                let binding = self.local.clone().ok_or_else(|| {
                    EngineError::Transport(format!("no local binding available for '{}'", name))
                })?;
                Ok(Box::new(LocalTransport::new(agent_id, name.clone(), binding)))
            }
        }
    }
}

/// Agency-side writer half of an agent connection
#[async_trait]
pub trait CommandSink: Send {
    async fn send(&mut self, command: Envelope<AgentCommand>) -> Result<()>;
    async fn close(&mut self);
}

/// Agency-side reader half of an agent connection
#[async_trait]
pub trait ReplySource: Send {
    /// `Ok(None)` once the agent side has closed
    async fn recv(&mut self) -> Result<Option<Envelope<AgentReply>>>;
}

/// An agent that has connected and identified itself
pub struct AgentConnection {
    pub agent_id: Uuid,
    pub commands: Box<dyn CommandSink>,
    pub replies: Box<dyn ReplySource>,
}

impl fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConnection").field("agent_id", &self.agent_id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoints() {
        assert_eq!(
            "tcp://127.0.0.1:4000".parse::<AgencyEndpoint>().unwrap(),
            AgencyEndpoint::Tcp("127.0.0.1:4000".into())
        );
        assert_eq!(
            "localhost:4000".parse::<AgencyEndpoint>().unwrap(),
            AgencyEndpoint::Tcp("localhost:4000".into())
        );
        assert_eq!(
            "local://suite-a".parse::<AgencyEndpoint>().unwrap(),
            AgencyEndpoint::Local("suite-a".into())
        );
    }

    #[test]
    fn test_reject_malformed_endpoints() {
        for bad in ["", "local://", "tcp://host", "host:notaport", ":80", "host:70000"] {
            assert!(bad.parse::<AgencyEndpoint>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_display_round_trips() {
        for text in ["tcp://10.0.0.1:81", "local://x"] {
            let endpoint: AgencyEndpoint = text.parse().unwrap();
            assert_eq!(endpoint.to_string(), text);
        }
    }

    #[test]
    fn test_factory_selects_by_scheme() {
        let factory = DefaultTransportFactory::new(Duration::from_secs(1));
        let tcp = factory
            .create(Uuid::new_v4(), &AgencyEndpoint::Tcp("127.0.0.1:1".into()))
            .unwrap();
        assert_eq!(tcp.kind(), TransportKind::Tcp);

        assert!(factory
            .create(Uuid::new_v4(), &AgencyEndpoint::Local("x".into()))
            .is_err());

        let factory = factory.with_local_binding(LocalBinding::new());
        let local = factory
            .create(Uuid::new_v4(), &AgencyEndpoint::Local("x".into()))
            .unwrap();
        assert_eq!(local.kind(), TransportKind::Local);
    }
}
