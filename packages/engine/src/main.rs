// packages/engine/src/main.rs
//! Test Agent
//!
//! Agent process launched by a test agency. Connects back to the agency,
//! serves test runs and exits when told to or when its parent goes away.
//!
//! Usage: agency-agent <agent-id> <agency-address> [--pid=N] [--trace:Level]
//!        [--work=DIR] [--debug-agent]

use agency_engine::agent::{run_agent, AgentEnvironment, AgentExitCode};
use agency_engine::utils::config::EngineConfig;
use anyhow::{Context, Result};

fn load_config() -> Result<EngineConfig> {
    EngineConfig::load().context("Failed to load agent configuration")
}

#[tokio::main]
async fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(AgentExitCode::UnexpectedException.code());
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = run_agent(&args, AgentEnvironment::os(config)).await;
    std::process::exit(code.code());
}
