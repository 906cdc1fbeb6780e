// src/context/mod.rs

//! Job context: the validated view of what the CI runner told us about the
//! job we are executing.
//!
//! [`JobContext::from_environment`] is a pure function of an
//! [`Environment`] snapshot, so every stage can rebuild the exact same value
//! without any state carried between processes.

pub mod registry;

use std::path::PathBuf;

use crate::config::MountKind;
use crate::env::Environment;
use crate::errors::ContextError;
use crate::vm::{VmIdentity, host_mount_dir};

pub use registry::{RegistryCredentials, registry_env_for_pull};

pub const JOB_ID_VAR: &str = "CUSTOM_ENV_CI_JOB_ID";
pub const JOB_IMAGE_VAR: &str = "CUSTOM_ENV_CI_JOB_IMAGE";
pub const BUILD_FAILURE_EXIT_CODE_VAR: &str = "BUILD_FAILURE_EXIT_CODE";
pub const SYSTEM_FAILURE_EXIT_CODE_VAR: &str = "SYSTEM_FAILURE_EXIT_CODE";

const DEFAULT_FAILURE_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: String,
    pub image: Option<String>,
    pub registry: Option<RegistryCredentials>,
    pub failure_exit_code: i32,
}

impl JobContext {
    pub fn from_environment(env: &Environment) -> Result<Self, ContextError> {
        let job_id = env
            .get(JOB_ID_VAR)
            .ok_or(ContextError::MissingJobContext(JOB_ID_VAR))?
            .to_string();

        let image = env.get_non_empty(JOB_IMAGE_VAR).map(str::to_string);

        let failure_exit_code = parse_exit_code(env, BUILD_FAILURE_EXIT_CODE_VAR)?;

        Ok(Self {
            job_id,
            image,
            registry: RegistryCredentials::from_job(env),
            failure_exit_code,
        })
    }

    pub fn identity(&self) -> VmIdentity {
        VmIdentity::for_job(&self.job_id)
    }

    /// Per-job temporary host directory for a host-mounted `kind`.
    pub fn host_dir_path(&self, kind: MountKind) -> PathBuf {
        host_mount_dir(&self.job_id, kind)
    }

    /// The job image, required by stages that create a VM.
    pub fn require_image(&self) -> Result<&str, ContextError> {
        self.image
            .as_deref()
            .ok_or(ContextError::MissingJobContext(JOB_IMAGE_VAR))
    }
}

/// Parse a numeric exit-code variable, defaulting to 1 when unset or empty.
pub fn parse_exit_code(env: &Environment, name: &str) -> Result<i32, ContextError> {
    match env.get_non_empty(name) {
        None => Ok(DEFAULT_FAILURE_EXIT_CODE),
        Some(raw) => raw
            .trim()
            .parse::<i32>()
            .map_err(|e| ContextError::InvalidEnvValue {
                name: name.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }),
    }
}
