// src/config/model.rs

use crate::env::Environment;
use crate::errors::ContextError;

/// Everything a stage process needs to know about how the driver was set up.
///
/// Built exactly once per process in `main` and passed down by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub driver: DriverConfig,
    pub exit_codes: ExitCodes,
}

impl ExecutorConfig {
    pub fn from_environment(env: &Environment) -> Result<Self, ContextError> {
        Ok(Self {
            driver: DriverConfig::from_environment(env)?,
            exit_codes: ExitCodes::from_environment(env),
        })
    }
}

/// Process exit codes the runner asked us to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes {
    pub build_failure: i32,
    pub system_failure: i32,
}

impl Default for ExitCodes {
    fn default() -> Self {
        Self {
            build_failure: 1,
            system_failure: 1,
        }
    }
}

/// How the guest is attached to the network.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// Engine default (shared NAT, address via DHCP lease).
    #[default]
    Default,
    /// Bridged to a host interface; address resolved via ARP.
    Bridged(String),
    /// Userspace packet filter, optionally with an allow-list of CIDRs.
    Softnet { allow: Option<String> },
}

impl NetworkMode {
    pub fn is_bridged(&self) -> bool {
        matches!(self, NetworkMode::Bridged(_))
    }
}

/// The driver configuration group (`TART_EXECUTOR_*`).
#[derive(Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub ssh_username: String,
    pub ssh_password: String,
    pub ssh_port: u16,
    pub network: NetworkMode,
    pub headless: bool,
    pub random_mac: bool,
    pub display: Option<String>,
    pub root_disk_opts: Option<String>,
    pub always_pull: bool,
    pub insecure_pull: bool,
    pub pull_concurrency: Option<u8>,
    /// Host-mount a per-job temporary directory as the builds directory.
    pub host_dir: bool,
    /// Host-mount a per-job temporary directory as the cache directory.
    pub host_cache_dir: bool,
    pub shell: Option<String>,
    pub install_runner: Option<String>,
    pub timezone: Option<String>,
    pub nested: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            ssh_username: "admin".to_string(),
            ssh_password: "admin".to_string(),
            ssh_port: 22,
            network: NetworkMode::Default,
            headless: true,
            random_mac: true,
            display: None,
            root_disk_opts: None,
            always_pull: true,
            insecure_pull: false,
            pull_concurrency: None,
            host_dir: false,
            host_cache_dir: false,
            shell: None,
            install_runner: None,
            timezone: None,
            nested: false,
        }
    }
}

impl std::fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConfig")
            .field("ssh_username", &self.ssh_username)
            .field("ssh_password", &"<redacted>")
            .field("ssh_port", &self.ssh_port)
            .field("network", &self.network)
            .field("headless", &self.headless)
            .field("random_mac", &self.random_mac)
            .field("display", &self.display)
            .field("root_disk_opts", &self.root_disk_opts)
            .field("always_pull", &self.always_pull)
            .field("insecure_pull", &self.insecure_pull)
            .field("pull_concurrency", &self.pull_concurrency)
            .field("host_dir", &self.host_dir)
            .field("host_cache_dir", &self.host_cache_dir)
            .field("shell", &self.shell)
            .field("install_runner", &self.install_runner)
            .field("timezone", &self.timezone)
            .field("nested", &self.nested)
            .finish()
    }
}

/// The two logical directories shared with the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountKind {
    Builds,
    Cache,
}

impl MountKind {
    pub const ALL: [MountKind; 2] = [MountKind::Builds, MountKind::Cache];

    pub fn name(self) -> &'static str {
        match self {
            MountKind::Builds => "builds",
            MountKind::Cache => "cache",
        }
    }

    /// Guest path used when nothing overrides it.
    pub fn default_guest_dir(self) -> &'static str {
        self.name()
    }

    pub fn host_dir_flag(self) -> &'static str {
        match self {
            MountKind::Builds => "--builds-dir",
            MountKind::Cache => "--cache-dir",
        }
    }

    pub fn guest_dir_flag(self) -> &'static str {
        match self {
            MountKind::Builds => "--guest-builds-dir",
            MountKind::Cache => "--guest-cache-dir",
        }
    }

    /// Driver variable that requests a per-job temporary host mount.
    pub fn host_mount_var(self) -> &'static str {
        match self {
            MountKind::Builds => "TART_EXECUTOR_HOST_DIR",
            MountKind::Cache => "TART_EXECUTOR_HOST_CACHE_DIR",
        }
    }

    /// Virtiofs tag the host directory is exposed under, qualified by job id
    /// so concurrent jobs on one host never collide.
    pub fn virtiofs_tag(self, job_id: &str) -> String {
        match self {
            MountKind::Builds => format!("tart.virtiofs.buildsdir.{job_id}"),
            MountKind::Cache => format!("tart.virtiofs.cachedir.{job_id}"),
        }
    }
}
