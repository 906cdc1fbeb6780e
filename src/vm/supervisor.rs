// src/vm/supervisor.rs

//! Clone, configure, launch, inspect and tear down the job's VM.
//!
//! The supervisor never holds a process handle: every operation addresses the
//! VM by its [`VmIdentity`], so a later stage process can pick up where an
//! earlier one left off.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::env::EnvOverrides;
use crate::errors::{EngineError, ExecutorError, Result};
use crate::exec::Engine;

use super::identity::{VmIdentity, VmProcessHandle};
use super::spec::VmRunSpec;

/// Transport options shared by `pull` and `clone`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOptions {
    pub insecure: bool,
    pub concurrency: Option<u8>,
    /// Registry credentials as engine environment overrides.
    pub registry_env: EnvOverrides,
}

impl PullOptions {
    fn extend_args(&self, args: &mut Vec<String>) {
        if self.insecure {
            args.push("--insecure".into());
        }
        if let Some(n) = self.concurrency.filter(|n| *n != 0) {
            args.push("--concurrency".into());
            args.push(n.to_string());
        }
    }
}

/// Guest operating system family, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestOs {
    Darwin,
    Linux,
    Other(String),
}

impl From<&str> for GuestOs {
    fn from(os: &str) -> Self {
        match os {
            "darwin" => GuestOs::Darwin,
            "linux" => GuestOs::Linux,
            other => GuestOs::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInfo {
    pub os: GuestOs,
}

#[derive(Deserialize)]
struct RawVmInfo {
    os: String,
}

pub struct VmSupervisor<'a> {
    engine: &'a dyn Engine,
    cancel: &'a CancellationToken,
}

impl<'a> VmSupervisor<'a> {
    pub fn new(engine: &'a dyn Engine, cancel: &'a CancellationToken) -> Self {
        Self { engine, cancel }
    }

    async fn exec(&self, args: Vec<String>, env: &EnvOverrides) -> std::result::Result<String, EngineError> {
        let output = self.engine.execute(&args, env, self.cancel).await?;
        Ok(output.stdout)
    }

    /// Fetch the latest version of `image` from its registry.
    pub async fn pull(&self, image: &str, options: &PullOptions) -> Result<()> {
        info!(%image, "pulling the latest version of the image");

        let mut args = vec!["pull".to_string(), image.to_string()];
        options.extend_args(&mut args);
        self.exec(args, &options.registry_env).await?;
        Ok(())
    }

    /// Clone `spec.image` into a new VM named `identity` and apply the
    /// CPU, memory, MAC and display overrides.
    ///
    /// Stops at the first failing engine call. Nothing is rolled back: the
    /// cleanup stage deletes the VM regardless.
    pub async fn create(&self, identity: &VmIdentity, spec: &VmRunSpec, options: &PullOptions) -> Result<()> {
        info!(vm = %identity, image = %spec.image, "cloning a new VM");

        let mut args = vec!["clone".to_string(), spec.image.clone(), identity.to_string()];
        options.extend_args(&mut args);
        self.exec(args, &options.registry_env).await?;

        info!(vm = %identity, "configuring the VM");
        let no_env = EnvOverrides::new();
        for set in spec.set_commands(identity.as_str()) {
            self.exec(set, &no_env).await?;
        }

        Ok(())
    }

    /// Start the VM in the background with its console output going to the
    /// identity's log file. Returns once the engine process has been started.
    pub fn launch(&self, identity: &VmIdentity, spec: &VmRunSpec) -> Result<VmProcessHandle> {
        let handle = VmProcessHandle::attach(identity.clone());
        let args = spec.run_args(identity.as_str());

        self.engine.launch_detached(&args, &spec.env, &handle.log_path)?;
        Ok(handle)
    }

    pub async fn info(&self, identity: &VmIdentity) -> Result<VmInfo> {
        let args = vec![
            "get".to_string(),
            "--format".to_string(),
            "json".to_string(),
            identity.to_string(),
        ];
        let command = args.join(" ");
        let stdout = self.exec(args, &EnvOverrides::new()).await?;

        let raw: RawVmInfo = serde_json::from_str(&stdout).map_err(|e| EngineError::InvalidOutput {
            command,
            reason: e.to_string(),
        })?;

        Ok(VmInfo {
            os: GuestOs::from(raw.os.as_str()),
        })
    }

    /// Stop the VM. Failures are logged and swallowed since the VM may
    /// already be stopped. Not bound by the cancellation signal.
    pub async fn stop(&self, identity: &VmIdentity) -> bool {
        let args = vec!["stop".to_string(), identity.to_string()];
        match self.engine.execute(&args, &EnvOverrides::new(), &CancellationToken::new()).await {
            Ok(_) => {
                info!(vm = %identity, "VM stopped");
                true
            }
            Err(e) => {
                warn!(vm = %identity, error = %e, "failed to stop VM");
                false
            }
        }
    }

    /// Delete the VM. Failures are always fatal so leaked VMs surface as
    /// system failures. Not bound by the cancellation signal.
    pub async fn delete(&self, identity: &VmIdentity) -> Result<()> {
        let args = vec!["delete".to_string(), identity.to_string()];
        self.engine
            .execute(&args, &EnvOverrides::new(), &CancellationToken::new())
            .await
            .map_err(|source| ExecutorError::VmDeleteFailed {
                identity: identity.to_string(),
                source,
            })?;

        info!(vm = %identity, "VM deleted");
        Ok(())
    }
}
