// packages/engine/src/observability/mod.rs
//! Logging setup
//!
//! The agency logs to stderr; each agent process logs to its own file in the
//! working directory given on its command line. `RUST_LOG` overrides the
//! configured level in both cases. Initialisation is first-call-wins.

use crate::utils::errors::Result;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install a stderr subscriber, optionally emitting JSON lines
pub fn init_tracing(level: LevelFilter, json: bool) {
    if json {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// Install a subscriber appending to `path`; nothing is installed for `OFF`
pub fn init_file_tracing(level: LevelFilter, path: &Path) -> Result<()> {
    if level == LevelFilter::OFF {
        return Ok(());
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_off_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        init_file_tracing(LevelFilter::OFF, &path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_file_created_in_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("agent.log");
        init_file_tracing(LevelFilter::INFO, &path).unwrap();
        assert!(path.exists());
    }
}
