//! Oracle-guided page automation runner.
//!
//! The runner drives a multi-step loop against one page: build a bounded
//! snapshot, ask the decision oracle what to do, execute the chosen action,
//! then decide whether to continue, escalate context detail, or stop.

pub mod core;
pub mod diagnostics;

pub use self::core::{
    ContextBuilder, Fingerprint, HttpOracle, OracleClient, OracleError, OracleTransport,
    ProgressDecision, ProgressState, ProgressTracker, RetryManager, RetryStats, Runner,
    RuntimeConfig,
};
pub use diagnostics::{NavDiagnosis, NavFailureKind};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Action selected by the decision oracle, consumed once per step.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click {
        selector: String,
        timeout_ms: Option<u64>,
    },
    Fill {
        selector: String,
        value: String,
    },
    Scroll,
    Wait,
    ToolCall {
        name: String,
        args: Map<String, Value>,
    },
    Complete {
        data: Value,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Fill { .. } => "fill",
            Action::Scroll => "scroll",
            Action::Wait => "wait",
            Action::ToolCall { .. } => "tool",
            Action::Complete { .. } => "complete",
        }
    }
}

/// Metadata attached to a run result: remediation hints and retry commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMeta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_commands: Vec<String>,
}

/// Externally visible outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub data: Value,
    pub steps_taken: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<String>,
    #[serde(default)]
    pub meta: RunMeta,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl RunResult {
    pub(crate) fn new(success: bool, data: Value, steps_taken: usize) -> Self {
        Self {
            success,
            reason: None,
            data,
            steps_taken,
            screenshots: Vec::new(),
            meta: RunMeta::default(),
            finished_at: chrono::Utc::now(),
        }
    }
}

/// Error type for runner operations.
///
/// Only [`RunnerError::Surface`] crosses the loop boundary; the outermost
/// caller converts it into a `{success: false}` result. Everything else is
/// absorbed inside the loop.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("page surface failure: {0}")]
    Surface(String),

    #[error("browser error: {0}")]
    Browser(String),
}

/// Result type for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;
