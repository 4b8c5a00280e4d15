// packages/engine/tests/agency.rs
//! Agency against real agent processes: the built `agency-agent` binary and
//! a script that never speaks the protocol

use agency_engine::runners::package::PROCESS_MODEL;
use agency_engine::runners::TestPackage;
use agency_engine::runtime::{AgentLaunch, Liveness, ProcessManager, TestAgency};
use agency_engine::transport::{AgencyEndpoint, RunRequest, TcpTransport, Transport};
use agency_engine::utils::config::EngineConfig;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;

const AGENT: &str = env!("CARGO_BIN_EXE_agency-agent");
const TIMEOUT: Duration = Duration::from_secs(10);

fn config(stop_timeout_ms: u64, request_timeout_ms: u64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.agency.bind_address = "127.0.0.1:0".to_string();
    config.agency.stop_timeout_ms = stop_timeout_ms;
    config.agency.request_timeout_ms = request_timeout_ms;
    config
}

async fn real_agency() -> TestAgency {
    TestAgency::start(&config(5_000, 5_000), ProcessManager::new(AGENT))
        .await
        .unwrap()
}

/// An "agent" that only sleeps; it never connects or answers
fn sleeper_script(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("sleeper.sh");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn tcp_address(agency: &TestAgency) -> String {
    match agency.endpoint() {
        AgencyEndpoint::Tcp(address) => address.clone(),
        other => panic!("unexpected endpoint {}", other),
    }
}

#[tokio::test]
async fn test_run_package_on_real_agent() {
    let agency = real_agency().await;
    let package = TestPackage::new(["true"]);

    let results = agency.run_package(&package, AgentLaunch::default()).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].passed());
    assert!(!results[0].agent_id.is_nil());
    assert_eq!(agency.agent_count(), 0);
}

#[tokio::test]
async fn test_multiple_process_model_uses_one_agent_per_assembly() {
    let agency = real_agency().await;
    let package = TestPackage::new(["true", "false"]).with_setting(PROCESS_MODEL, "Multiple");

    let results = agency.run_package(&package, AgentLaunch::default()).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_ne!(results[0].agent_id, results[1].agent_id);
    assert!(results[0].passed());
    assert!(!results[1].passed());
    assert_eq!(agency.agent_count(), 0);
}

#[tokio::test]
async fn test_handshake_matches_launched_agent() {
    let agency = real_agency().await;
    let agent_id = agency.launch_agent(AgentLaunch::default()).unwrap();

    let client = agency.wait_for_connection(agent_id, TIMEOUT).await.unwrap();
    assert_eq!(client.agent_id(), agent_id);
    let record = agency.record(agent_id).unwrap();
    assert_eq!(record.liveness, Liveness::Connected);
    assert!(record.pid.is_some());

    let result = agency
        .run(agent_id, RunRequest::new(TestPackage::new(["true"])))
        .await
        .unwrap();
    assert_eq!(result.agent_id, agent_id);
    assert_eq!(agency.record(agent_id).unwrap().liveness, Liveness::Connected);
}

#[tokio::test]
async fn test_stop_is_acknowledged_and_agent_exits() {
    let agency = real_agency().await;
    let agent_id = agency.launch_agent(AgentLaunch::default()).unwrap();
    agency.wait_for_connection(agent_id, TIMEOUT).await.unwrap();

    agency.stop_agent(agent_id).await.unwrap();
    assert!(agency.record(agent_id).is_none());
    assert_eq!(agency.agent_count(), 0);
}

#[tokio::test]
async fn test_killed_agent_is_dropped_after_both_observations() {
    let agency = real_agency().await;
    let agent_id = agency.launch_agent(AgentLaunch::default()).unwrap();
    agency.wait_for_connection(agent_id, TIMEOUT).await.unwrap();
    let pid = agency.record(agent_id).unwrap().pid.unwrap();

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
    assert!(agency.wait_for_exit(agent_id, TIMEOUT).await);

    let request = RunRequest::new(TestPackage::new(["true"]));
    assert!(agency.run(agent_id, request).await.is_err());
}

#[tokio::test]
async fn test_unresponsive_agent_is_terminated() {
    let dir = TempDir::new().unwrap();
    let processes = ProcessManager::new(sleeper_script(&dir)).with_kill_grace(Duration::from_millis(500));
    let agency = TestAgency::start(&config(200, 200), processes).await.unwrap();

    let agent_id = agency.launch_agent(AgentLaunch::default()).unwrap();
    // connect on the sleeper's behalf and never answer the stop command
    let mut transport = TcpTransport::new(agent_id, tcp_address(&agency), TIMEOUT);
    assert!(transport.start().await);
    agency.wait_for_connection(agent_id, TIMEOUT).await.unwrap();

    agency.stop_agent(agent_id).await.unwrap();
    assert!(agency.record(agent_id).is_none());
}

#[tokio::test]
async fn test_silent_connection_does_not_delay_other_agents() {
    let dir = TempDir::new().unwrap();
    let processes = ProcessManager::new(sleeper_script(&dir));
    let agency = TestAgency::start(&config(200, 1_000), processes).await.unwrap();
    let address = tcp_address(&agency);

    let _silent = TcpStream::connect(&address).await.unwrap();
    let agent_id = agency.launch_agent(AgentLaunch::default()).unwrap();
    let mut transport = TcpTransport::new(agent_id, address, TIMEOUT);
    assert!(transport.start().await);

    // well inside the handshake timeout the silent peer is holding
    agency
        .wait_for_connection(agent_id, Duration::from_secs(2))
        .await
        .unwrap();
    agency.shutdown().await;
}
