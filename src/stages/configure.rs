// src/stages/configure.rs

//! `configure` stage: decide where builds and cache live and tell the runner.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::info;

use crate::config::{MountChoice, MountKind, MountRequest, validate_mount};
use crate::context::JobContext;
use crate::env::Environment;
use crate::errors::Result;
use crate::exec::ENGINE_NAME;

use super::Orchestrator;
use super::handoff::{Handoff, MountHandoff};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureOptions {
    pub builds_dir: Option<String>,
    pub cache_dir: Option<String>,
    pub guest_builds_dir: Option<String>,
    pub guest_cache_dir: Option<String>,
}

impl ConfigureOptions {
    fn host_dir(&self, kind: MountKind) -> Option<String> {
        match kind {
            MountKind::Builds => self.builds_dir.clone(),
            MountKind::Cache => self.cache_dir.clone(),
        }
    }

    fn guest_dir(&self, kind: MountKind) -> Option<String> {
        match kind {
            MountKind::Builds => self.guest_builds_dir.clone(),
            MountKind::Cache => self.guest_cache_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverInfo {
    pub name: String,
    pub version: String,
}

/// The JSON document the runner reads from `configure`'s stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurePayload {
    pub builds_dir: String,
    pub cache_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub builds_dir_is_shared: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub job_env: BTreeMap<String, String>,
    pub driver: DriverInfo,
}

impl Orchestrator {
    pub async fn configure(&self, options: &ConfigureOptions) -> Result<ConfigurePayload> {
        let ctx = JobContext::from_environment(&self.env)?;
        let driver = &self.config.driver;

        // Validate everything before creating any directory.
        let mut choices = Vec::with_capacity(MountKind::ALL.len());
        for kind in MountKind::ALL {
            let request = MountRequest {
                host_mount: match kind {
                    MountKind::Builds => driver.host_dir,
                    MountKind::Cache => driver.host_cache_dir,
                },
                host_dir: options.host_dir(kind),
                guest_dir: options.guest_dir(kind),
            };
            choices.push((kind, validate_mount(kind, &request)?));
        }

        let mut handoff = Handoff::default();
        for (kind, choice) in choices {
            let mount = self.resolve_mount(&ctx, kind, choice).await?;
            info!(mount = kind.name(), guest_dir = %mount.guest_dir, on_host = ?mount.on_host, "mount decided");
            *handoff.mount_mut(kind) = mount;
        }

        Ok(ConfigurePayload {
            builds_dir: handoff.builds.guest_dir.clone(),
            cache_dir: handoff.cache.guest_dir.clone(),
            builds_dir_is_shared: options
                .builds_dir
                .as_deref()
                .filter(|d| !d.is_empty())
                .map(|_| true),
            job_env: handoff.to_job_env(),
            driver: DriverInfo {
                name: ENGINE_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })
    }

    async fn resolve_mount(&self, ctx: &JobContext, kind: MountKind, choice: MountChoice) -> Result<MountHandoff> {
        let default_guest = kind.default_guest_dir().to_string();

        Ok(match choice {
            MountChoice::Default => MountHandoff {
                guest_dir: default_guest,
                ..MountHandoff::default()
            },
            MountChoice::GuestDir(dir) => MountHandoff {
                guest_dir: dir,
                ..MountHandoff::default()
            },
            MountChoice::HostTemp => {
                let dir = ctx.host_dir_path(kind);
                create_private_dir(&dir).await?;
                let dir = dir.display().to_string();
                MountHandoff {
                    guest_dir: default_guest,
                    on_host: Some(dir.clone()),
                    temp_dir: Some(dir),
                }
            }
            MountChoice::HostDir(dir) => {
                let dir = expand_env(&dir, &self.env);
                create_private_dir(Path::new(&dir)).await?;
                MountHandoff {
                    guest_dir: default_guest,
                    on_host: Some(dir),
                    temp_dir: None,
                }
            }
        })
    }
}

async fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(path).await?;
    Ok(())
}

static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").expect("valid regex")
});

/// Replace `$VAR` and `${VAR}` with values from `env`; unknown variables
/// expand to nothing.
pub fn expand_env(input: &str, env: &Environment) -> String {
    ENV_REF
        .replace_all(input, |caps: &Captures<'_>| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            env.get(name).unwrap_or("").to_string()
        })
        .into_owned()
}
