// src/stages/prepare.rs

//! `prepare` stage: create and boot the job's VM, then get it ready.

use std::path::Path;

use sysinfo::System;
use tracing::{info, warn};

use crate::config::MountKind;
use crate::connect::{ConnectionSpec, RemoteSession};
use crate::context::{JobContext, registry_env_for_pull};
use crate::errors::{ExecutorError, Result};
use crate::vm::{GuestOs, PullOptions, VmRunSpec};

use super::Orchestrator;
use super::handoff::Handoff;
use super::provision::{InstallMethod, mount_command, resolve_timezone, timezone_command};

const LOCALTIME: &str = "/etc/localtime";
const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Number of VMs expected to share this host, used to split `auto`
    /// resources.
    pub concurrency: u64,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub dirs: Vec<String>,
    pub disks: Vec<String>,
    pub auto_prune: bool,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            cpu: None,
            memory: None,
            dirs: Vec::new(),
            disks: Vec::new(),
            auto_prune: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Cpu,
    MemoryMb,
}

impl Resource {
    fn flag(self) -> &'static str {
        match self {
            Resource::Cpu => "--cpu",
            Resource::MemoryMb => "--memory",
        }
    }

    fn host_total(self) -> u64 {
        let mut sys = System::new();
        match self {
            Resource::Cpu => {
                sys.refresh_cpu();
                sys.cpus().len() as u64
            }
            Resource::MemoryMb => {
                sys.refresh_memory();
                sys.total_memory() / MIB
            }
        }
    }
}

/// Parse a `--cpu` / `--memory` value: a number, or `auto` for this host's
/// total divided by `concurrency`.
pub fn parse_resource_override(raw: Option<&str>, resource: Resource, concurrency: u64) -> Result<Option<u64>> {
    parse_resource_with(raw, resource, concurrency, || resource.host_total())
}

fn parse_resource_with(
    raw: Option<&str>,
    resource: Resource,
    concurrency: u64,
    host_total: impl FnOnce() -> u64,
) -> Result<Option<u64>> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if raw == "auto" {
        let value = host_total() / concurrency.max(1);
        return Ok(Some(value).filter(|v| *v != 0));
    }

    raw.parse::<u64>().map(Some).map_err(|e| {
        ExecutorError::Configuration(format!(
            "invalid {} value {raw:?}, expected a number or \"auto\": {e}",
            resource.flag()
        ))
    })
}

impl Orchestrator {
    pub async fn prepare(&self, options: &PrepareOptions) -> Result<()> {
        let ctx = JobContext::from_environment(&self.env)?;
        let image = ctx.require_image()?.to_string();
        let identity = ctx.identity();
        let driver = &self.config.driver;
        let handoff = Handoff::from_environment(&self.env);

        // Everything that can be rejected up front is, before a VM exists.
        let cpu = parse_resource_override(options.cpu.as_deref(), Resource::Cpu, options.concurrency)?;
        let memory = parse_resource_override(options.memory.as_deref(), Resource::MemoryMb, options.concurrency)?;
        let install = InstallMethod::parse(driver.install_runner.as_deref())?;
        let timezone = driver
            .timezone
            .as_deref()
            .map(|tz| resolve_timezone(tz, Path::new(LOCALTIME)))
            .transpose()?;

        let pull = PullOptions {
            insecure: driver.insecure_pull,
            concurrency: driver.pull_concurrency,
            registry_env: registry_env_for_pull(&self.env, ctx.registry.as_ref()),
        };

        let supervisor = self.supervisor();
        if driver.always_pull {
            supervisor.pull(&image, &pull).await?;
        }

        let mut spec = VmRunSpec::from_config(image, driver)
            .with_cpu(cpu)
            .with_memory_mb(memory)
            .with_dirs(options.dirs.iter().cloned())
            .with_disks(options.disks.iter().cloned());
        for kind in MountKind::ALL {
            if let Some(on_host) = &handoff.mount(kind).on_host {
                spec = spec.with_host_mount(kind, on_host.clone(), &ctx.job_id);
            }
        }

        supervisor.create(&identity, &spec, &pull).await?;
        supervisor.launch(&identity, &spec)?;
        self.start_relay(&identity);

        info!(vm = %identity, "waiting for the VM to boot and accept remote sessions");
        let conn = ConnectionSpec::from_config(driver);
        let mut manager = self.connectivity();
        let session = manager.open_session(&identity, &conn).await?;
        info!(vm = %identity, "remote session established");

        if let Some(install) = install {
            info!(method = ?install, "installing GitLab Runner");
            let status = session.shell(None, install.script().into_bytes()).await?;
            check_status("GitLab Runner installation", status)?;
        }

        let needs_mounts = MountKind::ALL.iter().any(|k| handoff.mount(*k).on_host.is_some());
        let guest_os = if timezone.is_some() || needs_mounts {
            Some(supervisor.info(&identity).await?.os)
        } else {
            None
        };

        if let (Some(tz), Some(os)) = (&timezone, &guest_os) {
            run_checked(session.as_ref(), "timezone setup", &timezone_command(os, tz)).await?;
            info!(timezone = %tz, "timezone set");
        }

        if let Some(os) = &guest_os {
            mount_shared_dirs(session.as_ref(), os, &handoff, &ctx.job_id).await?;
        }

        manager.close(session);
        info!(vm = %identity, "VM is ready");
        Ok(())
    }
}

async fn mount_shared_dirs(session: &dyn RemoteSession, os: &GuestOs, handoff: &Handoff, job_id: &str) -> Result<()> {
    for kind in MountKind::ALL {
        let mount = handoff.mount(kind);
        if mount.on_host.is_none() {
            continue;
        }
        let command = mount_command(os, &kind.virtiofs_tag(job_id), &mount.guest_dir)?;
        run_checked(session, &format!("mounting {} directory", kind.name()), &command).await?;
        info!(mount = kind.name(), guest_dir = %mount.guest_dir, "host directory mounted");
    }
    Ok(())
}

async fn run_checked(session: &dyn RemoteSession, what: &str, command: &str) -> Result<()> {
    let output = session.run(command).await?;
    if !output.success() {
        warn!(what, status = output.status, stderr = %output.stderr.trim_end(), "remote command failed");
    }
    check_status(what, output.status)
}

fn check_status(what: &str, status: i32) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(ExecutorError::RemoteCommand {
            what: what.to_string(),
            status,
        })
    }
}
