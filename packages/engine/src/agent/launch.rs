// packages/engine/src/agent/launch.rs
//! Agent launch arguments
//!
//! ```text
//! agency-agent <agent-id> <agency-address> [--debug-agent] [--trace:<Level>]
//!              [--pid=<parent-pid>] [--work=<directory>]
//! ```
//!
//! Flags may appear in any order after the positional arguments. Flags the
//! agent does not know are ignored so older agents keep working with newer
//! agencies.

use crate::transport::AgencyEndpoint;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

const DEBUG_FLAG: &str = "--debug-agent";
const TRACE_PREFIX: &str = "--trace:";
const PID_PREFIX: &str = "--pid=";
const WORK_PREFIX: &str = "--work=";

/// Internal trace verbosity passed on the agent command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum TraceLevel {
    #[default]
    Off,
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
}

impl TraceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceLevel::Off => "Off",
            TraceLevel::Error => "Error",
            TraceLevel::Warning => "Warning",
            TraceLevel::Info => "Info",
            TraceLevel::Verbose => "Verbose",
            TraceLevel::Debug => "Debug",
        }
    }

    pub fn level_filter(self) -> LevelFilter {
        match self {
            TraceLevel::Off => LevelFilter::OFF,
            TraceLevel::Error => LevelFilter::ERROR,
            TraceLevel::Warning => LevelFilter::WARN,
            TraceLevel::Info => LevelFilter::INFO,
            TraceLevel::Verbose => LevelFilter::DEBUG,
            TraceLevel::Debug => LevelFilter::TRACE,
        }
    }
}

impl FromStr for TraceLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(TraceLevel::Off),
            "error" => Ok(TraceLevel::Error),
            "warning" => Ok(TraceLevel::Warning),
            "info" => Ok(TraceLevel::Info),
            "verbose" => Ok(TraceLevel::Verbose),
            "debug" => Ok(TraceLevel::Debug),
            _ => Err(EngineError::InvalidArguments(format!("unknown trace level '{}'", s))),
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed agent command line
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    /// Identity assigned by the agency before launch
    pub agent_id: Uuid,

    /// Where the agent connects back to
    pub agency: AgencyEndpoint,

    pub trace_level: TraceLevel,

    /// Working directory for log files; empty means the current directory
    pub work_directory: PathBuf,

    /// Process id of the launching agency, if given
    pub parent_pid: Option<i32>,

    pub debug_agent: bool,

    /// Trace value that could not be parsed and was replaced by `Off`
    pub rejected_trace: Option<String>,
}

impl LaunchOptions {
    /// Parse the arguments that follow the program name
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let agent_id = args
            .first()
            .ok_or_else(|| EngineError::InvalidArguments("missing agent id".into()))?;
        let agent_id = Uuid::parse_str(agent_id.as_ref()).map_err(|e| {
            EngineError::InvalidArguments(format!("malformed agent id '{}': {}", agent_id.as_ref(), e))
        })?;

        let agency = args
            .get(1)
            .ok_or_else(|| EngineError::InvalidArguments("missing agency address".into()))?;
        let agency: AgencyEndpoint = agency.as_ref().parse()?;

        let mut options = Self {
            agent_id,
            agency,
            trace_level: TraceLevel::Off,
            work_directory: PathBuf::new(),
            parent_pid: None,
            debug_agent: false,
            rejected_trace: None,
        };

        for arg in args.iter().skip(2).map(AsRef::as_ref) {
            if arg == DEBUG_FLAG {
                options.debug_agent = true;
            } else if let Some(level) = arg.strip_prefix(TRACE_PREFIX) {
                match level.parse() {
                    Ok(level) => options.trace_level = level,
                    Err(_) => {
                        options.trace_level = TraceLevel::Off;
                        options.rejected_trace = Some(level.to_string());
                    }
                }
            } else if let Some(pid) = arg.strip_prefix(PID_PREFIX) {
                let pid = pid.parse::<i32>().map_err(|_| {
                    EngineError::InvalidArguments(format!("malformed parent pid '{}'", pid))
                })?;
                options.parent_pid = Some(pid);
            } else if let Some(work) = arg.strip_prefix(WORK_PREFIX) {
                options.work_directory = PathBuf::from(work);
            }
        }

        Ok(options)
    }

    /// Render the command line the agency passes to a new agent
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.agent_id.to_string(), self.agency.to_string()];
        if self.debug_agent {
            args.push(DEBUG_FLAG.to_string());
        }
        args.push(format!("{}{}", TRACE_PREFIX, self.trace_level));
        if let Some(pid) = self.parent_pid {
            args.push(format!("{}{}", PID_PREFIX, pid));
        }
        if !self.work_directory.as_os_str().is_empty() {
            args.push(format!("{}{}", WORK_PREFIX, self.work_directory.display()));
        }
        args
    }

    /// Log file for this agent process
    pub fn log_path(&self, prefix: &str, pid: u32) -> PathBuf {
        self.work_directory.join(format!("{}_{}.log", prefix, pid))
    }
}
