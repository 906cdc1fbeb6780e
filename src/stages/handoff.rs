// src/stages/handoff.rs

//! Mount decisions handed from `configure` to the later stages.
//!
//! `configure` returns these variables in its `job_env`; the runner then sets
//! them on every later stage process. They carry no `CUSTOM_ENV_` prefix, so
//! a job cannot override them.

use std::collections::BTreeMap;

use crate::config::MountKind;
use crate::env::Environment;

pub const INTERNAL_BUILDS_DIR: &str = "TART_EXECUTOR_INTERNAL_BUILDS_DIR";
pub const INTERNAL_CACHE_DIR: &str = "TART_EXECUTOR_INTERNAL_CACHE_DIR";
pub const INTERNAL_BUILDS_DIR_ON_HOST: &str = "TART_EXECUTOR_INTERNAL_BUILDS_DIR_ON_HOST";
pub const INTERNAL_CACHE_DIR_ON_HOST: &str = "TART_EXECUTOR_INTERNAL_CACHE_DIR_ON_HOST";
pub const INTERNAL_HOST_DIR_PATH: &str = "TART_EXECUTOR_INTERNAL_HOST_DIR_PATH";
pub const INTERNAL_HOST_CACHE_DIR_PATH: &str = "TART_EXECUTOR_INTERNAL_HOST_CACHE_DIR_PATH";

/// Where one logical mount lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountHandoff {
    /// Path inside the guest.
    pub guest_dir: String,
    /// Host directory shared into the guest, if any.
    pub on_host: Option<String>,
    /// Set when `on_host` is a per-job temporary directory that cleanup
    /// must remove.
    pub temp_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handoff {
    pub builds: MountHandoff,
    pub cache: MountHandoff,
}

fn vars(kind: MountKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        MountKind::Builds => (INTERNAL_BUILDS_DIR, INTERNAL_BUILDS_DIR_ON_HOST, INTERNAL_HOST_DIR_PATH),
        MountKind::Cache => (INTERNAL_CACHE_DIR, INTERNAL_CACHE_DIR_ON_HOST, INTERNAL_HOST_CACHE_DIR_PATH),
    }
}

impl Handoff {
    pub fn mount(&self, kind: MountKind) -> &MountHandoff {
        match kind {
            MountKind::Builds => &self.builds,
            MountKind::Cache => &self.cache,
        }
    }

    pub fn mount_mut(&mut self, kind: MountKind) -> &mut MountHandoff {
        match kind {
            MountKind::Builds => &mut self.builds,
            MountKind::Cache => &mut self.cache,
        }
    }

    /// Read what `configure` decided. Missing guest paths fall back to the
    /// defaults so stages still work when `configure` was not used.
    pub fn from_environment(env: &Environment) -> Self {
        let mut handoff = Self::default();
        for kind in MountKind::ALL {
            let (guest_var, host_var, temp_var) = vars(kind);
            let mount = handoff.mount_mut(kind);
            mount.guest_dir = env
                .get_non_empty(guest_var)
                .unwrap_or(kind.default_guest_dir())
                .to_string();
            mount.on_host = env.get_non_empty(host_var).map(str::to_string);
            mount.temp_dir = env.get_non_empty(temp_var).map(str::to_string);
        }
        handoff
    }

    pub fn to_job_env(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for kind in MountKind::ALL {
            let (guest_var, host_var, temp_var) = vars(kind);
            let mount = self.mount(kind);
            out.insert(guest_var.to_string(), mount.guest_dir.clone());
            if let Some(on_host) = &mount.on_host {
                out.insert(host_var.to_string(), on_host.clone());
            }
            if let Some(temp) = &mount.temp_dir {
                out.insert(temp_var.to_string(), temp.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_env_round_trips_through_the_environment() {
        let handoff = Handoff {
            builds: MountHandoff {
                guest_dir: "builds".into(),
                on_host: Some("/tmp/tart-executor-builds-dir-42".into()),
                temp_dir: Some("/tmp/tart-executor-builds-dir-42".into()),
            },
            cache: MountHandoff {
                guest_dir: "/Volumes/cache".into(),
                on_host: None,
                temp_dir: None,
            },
        };

        let env: Environment = handoff.to_job_env().into_iter().collect();
        assert_eq!(Handoff::from_environment(&env), handoff);
    }

    #[test]
    fn user_prefixed_values_are_ignored() {
        let env = Environment::default()
            .with(format!("CUSTOM_ENV_{INTERNAL_BUILDS_DIR}"), "/evil")
            .with(format!("CUSTOM_ENV_{INTERNAL_HOST_DIR_PATH}"), "/");

        let handoff = Handoff::from_environment(&env);
        assert_eq!(handoff.builds.guest_dir, "builds");
        assert_eq!(handoff.builds.temp_dir, None);
    }
}
