// src/config/loader.rs

//! Load the driver configuration group from an environment snapshot.
//!
//! Each setting `X` is read from `CUSTOM_ENV_TART_EXECUTOR_X` (set per job)
//! first and `TART_EXECUTOR_X` (set by the runner operator) second. Missing
//! settings fall back to [`DriverConfig::default`].

use std::str::FromStr;

use tracing::warn;

use crate::config::model::{DriverConfig, ExitCodes, NetworkMode};
use crate::context::{BUILD_FAILURE_EXIT_CODE_VAR, JobContext, SYSTEM_FAILURE_EXIT_CODE_VAR, parse_exit_code};
use crate::env::{Environment, USER_VAR_PREFIX};
use crate::errors::ContextError;

pub const CONFIG_PREFIX: &str = "TART_EXECUTOR_";

/// Full operator-level variable name for a driver setting.
pub fn driver_var(setting: &str) -> String {
    format!("{CONFIG_PREFIX}{setting}")
}

struct Lookup<'a> {
    env: &'a Environment,
}

impl<'a> Lookup<'a> {
    /// Returns the variable name that matched along with its value.
    fn raw(&self, setting: &str) -> Option<(String, &'a str)> {
        let operator = driver_var(setting);
        let job = format!("{USER_VAR_PREFIX}{operator}");

        if let Some(v) = self.env.get_non_empty(&job) {
            return Some((job, v));
        }
        self.env.get_non_empty(&operator).map(|v| (operator, v))
    }

    fn string(&self, setting: &str) -> Option<String> {
        self.raw(setting).map(|(_, v)| v.to_string())
    }

    fn bool(&self, setting: &str, default: bool) -> Result<bool, ContextError> {
        match self.raw(setting) {
            None => Ok(default),
            Some((name, value)) => parse_bool(value).ok_or_else(|| ContextError::InvalidEnvValue {
                name,
                value: value.to_string(),
                reason: "expected a boolean (true/false)".to_string(),
            }),
        }
    }

    fn number<T>(&self, setting: &str) -> Result<Option<T>, ContextError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(setting) {
            None => Ok(None),
            Some((name, value)) => value.trim().parse::<T>().map(Some).map_err(|e| {
                ContextError::InvalidEnvValue {
                    name,
                    value: value.to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl DriverConfig {
    pub fn from_environment(env: &Environment) -> Result<Self, ContextError> {
        let lookup = Lookup { env };
        let defaults = DriverConfig::default();

        let network = load_network(&lookup)?;

        Ok(Self {
            ssh_username: lookup.string("SSH_USERNAME").unwrap_or(defaults.ssh_username),
            ssh_password: lookup.string("SSH_PASSWORD").unwrap_or(defaults.ssh_password),
            ssh_port: lookup.number("SSH_PORT")?.unwrap_or(defaults.ssh_port),
            network,
            headless: lookup.bool("HEADLESS", defaults.headless)?,
            random_mac: lookup.bool("RANDOM_MAC", defaults.random_mac)?,
            display: lookup.string("DISPLAY"),
            root_disk_opts: lookup.string("ROOT_DISK_OPTS"),
            always_pull: lookup.bool("ALWAYS_PULL", defaults.always_pull)?,
            insecure_pull: lookup.bool("INSECURE_PULL", defaults.insecure_pull)?,
            pull_concurrency: lookup.number::<u8>("PULL_CONCURRENCY")?.filter(|n| *n != 0),
            host_dir: lookup.bool("HOST_DIR", defaults.host_dir)?,
            host_cache_dir: lookup.bool("HOST_CACHE_DIR", defaults.host_cache_dir)?,
            shell: lookup.string("SHELL"),
            install_runner: lookup.string("INSTALL_GITLAB_RUNNER"),
            timezone: lookup.string("TIMEZONE"),
            nested: lookup.bool("NESTED", defaults.nested)?,
        })
    }
}

fn load_network(lookup: &Lookup<'_>) -> Result<NetworkMode, ContextError> {
    let bridged = lookup.string("BRIDGED");
    let softnet = lookup.bool("SOFTNET", false)?;
    let allow = lookup.string("SOFTNET_ALLOW");

    match (bridged, softnet) {
        (Some(iface), true) => Err(ContextError::InvalidEnvValue {
            name: driver_var("BRIDGED"),
            value: iface,
            reason: format!("cannot be combined with {}", driver_var("SOFTNET")),
        }),
        (Some(iface), false) => Ok(NetworkMode::Bridged(iface)),
        (None, true) => Ok(NetworkMode::Softnet { allow }),
        (None, false) => {
            if allow.is_some() {
                warn!(
                    "{} is ignored unless {} is enabled",
                    driver_var("SOFTNET_ALLOW"),
                    driver_var("SOFTNET")
                );
            }
            Ok(NetworkMode::Default)
        }
    }
}

impl ExitCodes {
    /// Read the runner's exit codes.
    ///
    /// The build-failure code is the job's own, as [`JobContext`] reads it.
    /// This has to work even when the rest of the environment is broken, so
    /// without a job context or on unparsable values the code is read
    /// directly, logged and replaced by the default.
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = ExitCodes::default();
        let read = |name: &str, default: i32| match parse_exit_code(env, name) {
            Ok(code) => code,
            Err(e) => {
                warn!(error = %e, "using default exit code {default}");
                default
            }
        };

        let build_failure = match JobContext::from_environment(env) {
            Ok(ctx) => ctx.failure_exit_code,
            Err(_) => read(BUILD_FAILURE_EXIT_CODE_VAR, defaults.build_failure),
        };

        Self {
            build_failure,
            system_failure: read(SYSTEM_FAILURE_EXIT_CODE_VAR, defaults.system_failure),
        }
    }
}
