// src/stages/cleanup.rs

//! `cleanup` stage: tear the job's VM down.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{info, warn};

use crate::config::MountKind;
use crate::context::JobContext;
use crate::errors::Result;

use super::Orchestrator;
use super::handoff::Handoff;

impl Orchestrator {
    /// Stop (best effort) and delete (mandatory) the VM, then remove the
    /// per-job files it left on the host.
    pub async fn cleanup(&self) -> Result<()> {
        let ctx = JobContext::from_environment(&self.env)?;
        let identity = ctx.identity();
        let supervisor = self.supervisor();

        supervisor.stop(&identity).await;
        supervisor.delete(&identity).await?;

        let handoff = Handoff::from_environment(&self.env);
        for kind in MountKind::ALL {
            if let Some(dir) = &handoff.mount(kind).temp_dir {
                remove_best_effort(Path::new(dir), true).await;
            }
        }

        remove_best_effort(&identity.log_path(), false).await;
        info!(vm = %identity, "cleanup finished");
        Ok(())
    }
}

async fn remove_best_effort(path: &Path, is_dir: bool) {
    let result = if is_dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to clean up"),
    }
}
