// src/stages/outcome.rs

use crate::config::ExitCodes;
use crate::errors::{ExecutorError, Result};

/// How a stage ended, as far as the CI runner is concerned.
#[derive(Debug)]
pub enum StageOutcome {
    Success,
    /// The job script exited with this status over an established session.
    BuildFailure(i32),
    /// Anything else went wrong; the runner may retry the job.
    SystemFailure(ExecutorError),
}

impl StageOutcome {
    pub fn exit_code(&self, codes: &ExitCodes) -> i32 {
        match self {
            StageOutcome::Success => 0,
            StageOutcome::BuildFailure(_) => codes.build_failure,
            StageOutcome::SystemFailure(_) => codes.system_failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }
}

impl From<Result<()>> for StageOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => StageOutcome::Success,
            Err(ExecutorError::ScriptExecution { status }) => StageOutcome::BuildFailure(status),
            Err(e) => StageOutcome::SystemFailure(e),
        }
    }
}
