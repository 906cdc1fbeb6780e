// src/vm/identity.rs

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::MountKind;

/// Deterministic VM instance name derived from the CI job id.
///
/// Every stage process recomputes it from the job environment, which is how
/// `run` and `cleanup` find the VM that `prepare` started.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmIdentity(String);

impl VmIdentity {
    pub fn for_job(job_id: &str) -> Self {
        Self(format!("job-{job_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Log file receiving the detached `run` process's console output.
    pub fn log_path(&self) -> PathBuf {
        self.log_path_in(&std::env::temp_dir())
    }

    pub fn log_path_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}-tart-run-output.log", self.0))
    }
}

impl fmt::Display for VmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A VM started by a previous stage, addressed purely by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmProcessHandle {
    pub identity: VmIdentity,
    pub log_path: PathBuf,
}

impl VmProcessHandle {
    pub fn attach(identity: VmIdentity) -> Self {
        let log_path = identity.log_path();
        Self { identity, log_path }
    }
}

/// Per-job temporary host directory used when a mount is host-mounted
/// without an explicit path.
pub fn host_mount_dir(job_id: &str, kind: MountKind) -> PathBuf {
    std::env::temp_dir().join(format!("tart-executor-{}-dir-{job_id}", kind.name()))
}
