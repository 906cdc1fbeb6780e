// src/context/registry.rs

//! Registry credentials for pulling and cloning VM images.
//!
//! Two sources, in priority order:
//! 1. explicit overrides set by the job (`CUSTOM_ENV_TART_REGISTRY_*`),
//! 2. the registry the CI system itself provides (`CUSTOM_ENV_CI_REGISTRY*`).
//!
//! The credentials only ever travel as environment overrides of the engine's
//! `pull`/`clone` invocations; they are never written anywhere.

use crate::env::{EnvOverrides, Environment};

const CI_REGISTRY: &str = "CUSTOM_ENV_CI_REGISTRY";
const CI_REGISTRY_USER: &str = "CUSTOM_ENV_CI_REGISTRY_USER";
const CI_REGISTRY_PASSWORD: &str = "CUSTOM_ENV_CI_REGISTRY_PASSWORD";

const OVERRIDE_HOSTNAME: &str = "CUSTOM_ENV_TART_REGISTRY_HOSTNAME";
const OVERRIDE_USERNAME: &str = "CUSTOM_ENV_TART_REGISTRY_USERNAME";
const OVERRIDE_PASSWORD: &str = "CUSTOM_ENV_TART_REGISTRY_PASSWORD";

pub const ENGINE_REGISTRY_HOSTNAME: &str = "TART_REGISTRY_HOSTNAME";
pub const ENGINE_REGISTRY_USERNAME: &str = "TART_REGISTRY_USERNAME";
pub const ENGINE_REGISTRY_PASSWORD: &str = "TART_REGISTRY_PASSWORD";

#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub address: Option<String>,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl RegistryCredentials {
    /// Registry provided by the CI system. All three variables must be set.
    pub fn from_job(env: &Environment) -> Option<Self> {
        let address = env.get(CI_REGISTRY)?;
        let user = env.get(CI_REGISTRY_USER)?;
        let password = env.get(CI_REGISTRY_PASSWORD)?;

        Some(Self {
            address: Some(address.to_string()),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// Explicit credentials the job set for the engine. Username and password
    /// are both required; the hostname is optional.
    pub fn from_overrides(env: &Environment) -> Option<Self> {
        let user = env.get(OVERRIDE_USERNAME)?;
        let password = env.get(OVERRIDE_PASSWORD)?;

        Some(Self {
            address: env.get(OVERRIDE_HOSTNAME).map(str::to_string),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn to_engine_env(&self) -> EnvOverrides {
        let mut env = EnvOverrides::new();
        if let Some(address) = &self.address {
            env.insert(ENGINE_REGISTRY_HOSTNAME.to_string(), address.clone());
        }
        env.insert(ENGINE_REGISTRY_USERNAME.to_string(), self.user.clone());
        env.insert(ENGINE_REGISTRY_PASSWORD.to_string(), self.password.clone());
        env
    }
}

/// Environment overrides for `pull`/`clone`: explicit overrides win over the
/// job-provided registry; no credentials at all yields an empty map.
pub fn registry_env_for_pull(env: &Environment, job: Option<&RegistryCredentials>) -> EnvOverrides {
    RegistryCredentials::from_overrides(env)
        .as_ref()
        .or(job)
        .map(RegistryCredentials::to_engine_env)
        .unwrap_or_default()
}
