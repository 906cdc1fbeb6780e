// src/stages/run.rs

//! `run` stage: pipe one job script into the VM's shell.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::connect::{ConnectionSpec, exported_script};
use crate::context::JobContext;
use crate::errors::{ExecutorError, Result};

use super::Orchestrator;

/// File the runner asks us to write the script's exit status into.
pub const BUILD_EXIT_CODE_FILE_VAR: &str = "BUILD_EXIT_CODE_FILE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub script: PathBuf,
    /// Runner sub-stage name (e.g. `build_script`), for logs only.
    pub stage: Option<String>,
}

impl Orchestrator {
    pub async fn run(&self, options: &RunOptions) -> Result<()> {
        let ctx = JobContext::from_environment(&self.env)?;
        let identity = ctx.identity();

        let script = tokio::fs::read(&options.script).await?;
        let script = exported_script(self.env.user_variables(), &script);

        self.start_relay(&identity);

        let conn = ConnectionSpec::from_config(&self.config.driver);
        let mut manager = self.connectivity();
        let session = manager.open_session(&identity, &conn).await?;

        info!(
            vm = %identity,
            stage = options.stage.as_deref().unwrap_or("-"),
            shell = conn.shell.as_deref().unwrap_or("login shell"),
            "running job script"
        );
        let status = session.shell(conn.shell.as_deref(), script).await?;
        manager.close(session);

        if status != 0 {
            if let Some(path) = self.env.get_non_empty(BUILD_EXIT_CODE_FILE_VAR) {
                write_exit_code_file(Path::new(path), status).await;
            }
            return Err(ExecutorError::ScriptExecution { status });
        }

        Ok(())
    }
}

async fn write_exit_code_file(path: &Path, status: i32) {
    if let Err(e) = tokio::fs::write(path, format!("{status}\n")).await {
        warn!(
            path = %path.display(),
            error = %e,
            "failed to propagate the script's exit code to {BUILD_EXIT_CODE_FILE_VAR}"
        );
    }
}
