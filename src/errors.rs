// src/errors.rs

//! Crate-wide error types.
//!
//! Every stage funnels its failures into [`ExecutorError`]; the stage
//! orchestrator then decides whether an error is a *system* failure
//! (infrastructure, retryable by the runner) or a *build* failure (the job's
//! own script exited non-zero). See [`ExecutorError::is_build_failure`].

use std::fmt;

use thiserror::Error;

/// Problems with the job environment handed to us by the CI runner.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("{0} is missing from the job environment")]
    MissingJobContext(&'static str),

    #[error("failed to parse {name}'s value {value:?}: {reason}")]
    InvalidEnvValue {
        name: String,
        value: String,
        reason: String,
    },
}

/// Raw output of a failed engine invocation, kept as the source of
/// [`EngineError::CommandFailed`] so logs can show everything the tool said.
#[derive(Debug, Clone)]
pub struct EngineOutputDump {
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for EngineOutputDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stdout: {:?}, stderr: {:?}",
            self.stdout.trim_end(),
            self.stderr.trim_end()
        )
    }
}

impl std::error::Error for EngineOutputDump {}

/// Failures talking to the external VM engine binary.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{name} command not found in PATH (also tried {fallback}), make sure it is installed")]
    NotFound { name: String, fallback: String },

    #[error("failed to execute {binary}: {source}")]
    Exec {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine command returned non-zero exit code: {summary:?}")]
    CommandFailed {
        summary: String,
        code: Option<i32>,
        #[source]
        output: EngineOutputDump,
    },

    #[error("engine command `{command}` was cancelled")]
    Cancelled { command: String },

    #[error("unexpected engine output for `{command}`: {reason}")]
    InvalidOutput { command: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("job environment error: {0}")]
    Context(#[from] ContextError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to delete VM {identity}: {source}")]
    VmDeleteFailed {
        identity: String,
        #[source]
        source: EngineError,
    },

    #[error("VM connectivity error: {0}")]
    Connectivity(String),

    #[error("{what} exited with status {status}")]
    RemoteCommand { what: String, status: i32 },

    #[error("job script exited with status {status}")]
    ScriptExecution { status: i32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExecutorError {
    /// Whether this error is the job's own fault rather than ours.
    ///
    /// Only a non-zero exit of the job script over an established session
    /// counts; everything else is an infrastructure failure.
    pub fn is_build_failure(&self) -> bool {
        matches!(self, ExecutorError::ScriptExecution { .. })
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ExecutorError>;
