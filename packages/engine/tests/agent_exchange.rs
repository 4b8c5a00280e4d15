// packages/engine/tests/agent_exchange.rs
//! Request/response exchange between an agency client and a remote agent

use agency_engine::agent::{AgentState, RemoteTestAgent, TestExecutor};
use agency_engine::runners::TestPackage;
use agency_engine::runtime::AgentClient;
use agency_engine::transport::protocol::{AssemblyResult, TestStatus};
use agency_engine::transport::{
    AgentCommand, AgentConnection, AgentReply, Envelope, LocalBinding, LocalTransport, RunRequest, RunResult,
    TcpAgencyListener, TcpTransport,
};
use agency_engine::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Passes every assembly immediately
struct EchoExecutor;

#[async_trait]
impl TestExecutor for EchoExecutor {
    async fn execute(&self, agent_id: Uuid, request: RunRequest) -> Result<RunResult> {
        Ok(RunResult {
            agent_id,
            assemblies: request
                .package
                .assemblies
                .iter()
                .map(|assembly| AssemblyResult {
                    assembly: assembly.clone(),
                    status: TestStatus::Passed,
                    exit_code: Some(0),
                    duration_ms: 0,
                    output: String::new(),
                })
                .collect(),
        })
    }
}

/// Holds each run until released
struct GatedExecutor {
    gate: Arc<Notify>,
}

#[async_trait]
impl TestExecutor for GatedExecutor {
    async fn execute(&self, agent_id: Uuid, request: RunRequest) -> Result<RunResult> {
        self.gate.notified().await;
        EchoExecutor.execute(agent_id, request).await
    }
}

async fn local_pair(executor: Arc<dyn TestExecutor>) -> (Arc<RemoteTestAgent>, Arc<AgentClient>) {
    let binding = LocalBinding::new();
    let mut port = binding.bind("agency").unwrap();
    let agent_id = Uuid::new_v4();
    let agent = RemoteTestAgent::new(agent_id, executor);

    assert!(agent.start(Box::new(LocalTransport::new(agent_id, "agency", binding))).await);
    let connection = port.accept().await.unwrap();
    (agent, AgentClient::spawn(connection, TIMEOUT))
}

async fn tcp_pair(executor: Arc<dyn TestExecutor>) -> (Arc<RemoteTestAgent>, Arc<AgentClient>) {
    let listener = TcpAgencyListener::bind("127.0.0.1:0").await.unwrap();
    let agent_id = Uuid::new_v4();
    let agent = RemoteTestAgent::new(agent_id, executor);

    let transport = TcpTransport::new(agent_id, listener.local_addr().to_string(), TIMEOUT);
    assert!(agent.start(Box::new(transport)).await);
    let connection = listener.accept(TIMEOUT).await.unwrap();
    assert_eq!(connection.agent_id, agent_id);
    (agent, AgentClient::spawn(connection, TIMEOUT))
}

async fn assert_back_to_back(agent: Arc<RemoteTestAgent>, client: Arc<AgentClient>) {
    for round in 0..3 {
        let assembly = format!("suite-{}.bin", round);
        let result = client.run(RunRequest::new(TestPackage::new([assembly.clone()]))).await.unwrap();
        assert_eq!(result.agent_id, agent.id());
        assert_eq!(result.assemblies.len(), 1);
        assert_eq!(result.assemblies[0].assembly, assembly);
        assert!(result.passed());
    }

    client.stop().await.unwrap();
    assert!(agent.wait_for_stop(TIMEOUT).await);
    tokio::time::timeout(TIMEOUT, client.closed()).await.unwrap();
}

#[tokio::test]
async fn test_back_to_back_runs_over_local_transport() {
    let (agent, client) = local_pair(Arc::new(EchoExecutor)).await;
    assert_back_to_back(agent, client).await;
}

#[tokio::test]
async fn test_back_to_back_runs_over_tcp() {
    let (agent, client) = tcp_pair(Arc::new(EchoExecutor)).await;
    assert_back_to_back(agent, client).await;
}

#[tokio::test]
async fn test_concurrent_pings_are_all_answered() {
    let (_agent, client) = tcp_pair(Arc::new(EchoExecutor)).await;
    let (a, b, c) = tokio::join!(client.ping(), client.ping(), client.ping());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
}

/// Send pings 1, 2, 3 back to back and collect the reply ids
async fn ping_reply_ids(mut connection: AgentConnection) -> Vec<u64> {
    for id in 1..=3 {
        connection
            .commands
            .send(Envelope::new(id, AgentCommand::Ping))
            .await
            .unwrap();
    }
    let mut ids = Vec::new();
    while ids.len() < 3 {
        let reply = tokio::time::timeout(TIMEOUT, connection.replies.recv())
            .await
            .unwrap()
            .unwrap()
            .expect("agent closed the connection");
        assert_eq!(reply.body, AgentReply::Pong);
        ids.push(reply.id);
    }
    ids
}

#[tokio::test]
async fn test_replies_follow_command_order() {
    let binding = LocalBinding::new();
    let mut port = binding.bind("agency").unwrap();
    let agent_id = Uuid::new_v4();
    let local_agent = RemoteTestAgent::new(agent_id, Arc::new(EchoExecutor));
    assert!(local_agent.start(Box::new(LocalTransport::new(agent_id, "agency", binding))).await);
    let connection = port.accept().await.unwrap();
    assert_eq!(ping_reply_ids(connection).await, vec![1, 2, 3]);

    let listener = TcpAgencyListener::bind("127.0.0.1:0").await.unwrap();
    let agent_id = Uuid::new_v4();
    let tcp_agent = RemoteTestAgent::new(agent_id, Arc::new(EchoExecutor));
    let transport = TcpTransport::new(agent_id, listener.local_addr().to_string(), TIMEOUT);
    assert!(tcp_agent.start(Box::new(transport)).await);
    let connection = listener.accept(TIMEOUT).await.unwrap();
    assert_eq!(ping_reply_ids(connection).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_overlapping_run_is_rejected_as_busy() {
    let gate = Arc::new(Notify::new());
    let (agent, client) = local_pair(Arc::new(GatedExecutor { gate: Arc::clone(&gate) })).await;

    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.run(RunRequest::new(TestPackage::new(["slow.bin"]))).await })
    };
    let mut state = agent.subscribe();
    tokio::time::timeout(TIMEOUT, state.wait_for(|s| *s == AgentState::Running))
        .await
        .unwrap()
        .unwrap();

    let second = client.run(RunRequest::new(TestPackage::new(["fast.bin"]))).await;
    assert!(matches!(second, Err(EngineError::AgentBusy { .. })));

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.assemblies[0].assembly, "slow.bin");

    // the slot is free again once the result is delivered
    gate.notify_one();
    assert!(client.run(RunRequest::new(TestPackage::new(["again.bin"]))).await.is_ok());
}

#[tokio::test]
async fn test_agent_stop_closes_client() {
    let (agent, client) = local_pair(Arc::new(EchoExecutor)).await;
    agent.stop();
    tokio::time::timeout(TIMEOUT, client.closed()).await.unwrap();

    assert!(matches!(client.ping().await, Err(EngineError::TransportClosed)));
}
