// src/exec/backend.rs

//! Pluggable engine abstraction.
//!
//! The VM supervisor and the connectivity manager talk to an `Engine`
//! instead of spawning the engine binary themselves. Production code uses
//! [`EngineGateway`](super::EngineGateway); tests provide an implementation
//! that records argument vectors and returns scripted results.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::env::EnvOverrides;
use crate::errors::EngineError;

/// Captured output of a successful engine invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub stdout: String,
    pub stderr: String,
}

impl EngineOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

pub type EngineFuture<'a> =
    Pin<Box<dyn Future<Output = Result<EngineOutput, EngineError>> + Send + 'a>>;

/// Trait abstracting how the external VM engine is invoked.
pub trait Engine: Send + Sync {
    /// Run the engine to completion with `args`, layering `env` over the
    /// inherited environment.
    ///
    /// Implementations must stop waiting (and kill the subprocess, if any)
    /// once `cancel` fires.
    fn execute<'a>(
        &'a self,
        args: &'a [String],
        env: &'a EnvOverrides,
        cancel: &'a CancellationToken,
    ) -> EngineFuture<'a>;

    /// Start the engine in the background, detached from this process, with
    /// stdout and stderr appended to `log_path`.
    ///
    /// Returns as soon as the process has been started; the caller may exit
    /// while the child keeps running.
    fn launch_detached(
        &self,
        args: &[String],
        env: &EnvOverrides,
        log_path: &Path,
    ) -> Result<(), EngineError>;
}
