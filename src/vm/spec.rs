// src/vm/spec.rs

//! Immutable description of how a job's VM is created and run.

use crate::config::{DriverConfig, MountKind, NetworkMode};
use crate::env::EnvOverrides;

/// One `--dir` argument for the engine's `run` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryMount {
    /// Operator-supplied value, passed through verbatim.
    Raw(String),
    /// A host directory exposed under a virtiofs tag.
    Tagged { host_path: String, tag: String },
}

impl DirectoryMount {
    pub fn to_arg(&self) -> String {
        match self {
            DirectoryMount::Raw(value) => value.clone(),
            DirectoryMount::Tagged { host_path, tag } => format!("{host_path}:tag={tag}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRunSpec {
    pub image: String,
    pub cpu: Option<u64>,
    pub memory_mb: Option<u64>,
    pub network: NetworkMode,
    pub headless: bool,
    pub random_mac: bool,
    pub display: Option<String>,
    pub root_disk_opts: Option<String>,
    pub nested: bool,
    pub dir_mounts: Vec<DirectoryMount>,
    pub disk_mounts: Vec<String>,
    /// Extra environment for the detached `run` process.
    pub env: EnvOverrides,
}

impl VmRunSpec {
    /// Spec for `image` with every VM-level setting taken from the driver
    /// configuration and no mounts or environment overrides yet.
    pub fn from_config(image: impl Into<String>, config: &DriverConfig) -> Self {
        Self {
            image: image.into(),
            cpu: None,
            memory_mb: None,
            network: config.network.clone(),
            headless: config.headless,
            random_mac: config.random_mac,
            display: config.display.clone(),
            root_disk_opts: config.root_disk_opts.clone(),
            nested: config.nested,
            dir_mounts: Vec::new(),
            disk_mounts: Vec::new(),
            env: EnvOverrides::new(),
        }
    }

    pub fn with_cpu(mut self, cpu: Option<u64>) -> Self {
        self.cpu = cpu;
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: Option<u64>) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dir_mounts
            .extend(dirs.into_iter().map(|d| DirectoryMount::Raw(d.into())));
        self
    }

    pub fn with_disks<I, S>(mut self, disks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disk_mounts.extend(disks.into_iter().map(Into::into));
        self
    }

    /// Expose `host_path` to the guest under the job-qualified tag for `kind`.
    pub fn with_host_mount(mut self, kind: MountKind, host_path: impl Into<String>, job_id: &str) -> Self {
        self.dir_mounts.push(DirectoryMount::Tagged {
            host_path: host_path.into(),
            tag: kind.virtiofs_tag(job_id),
        });
        self
    }

    /// Argument vector for the engine's `run` subcommand, VM name last.
    pub fn run_args(&self, vm_name: &str) -> Vec<String> {
        let mut args = vec!["run".to_string()];

        if let NetworkMode::Softnet { allow } = &self.network {
            args.push("--net-softnet".into());
            if let Some(allow) = allow {
                args.push("--net-softnet-allow".into());
                args.push(allow.clone());
            }
        }

        if let Some(opts) = &self.root_disk_opts {
            args.push("--root-disk-opts".into());
            args.push(opts.clone());
        }

        if let NetworkMode::Bridged(iface) = &self.network {
            args.push("--net-bridged".into());
            args.push(iface.clone());
        }

        if self.headless {
            args.push("--no-graphics".into());
        }

        if self.nested {
            args.push("--nested".into());
        }

        for dir in &self.dir_mounts {
            args.push("--dir".into());
            args.push(dir.to_arg());
        }

        for disk in &self.disk_mounts {
            args.push("--disk".into());
            args.push(disk.clone());
        }

        args.push(vm_name.to_string());
        args
    }

    /// `set` invocations applied right after cloning, in order.
    pub fn set_commands(&self, vm_name: &str) -> Vec<Vec<String>> {
        let mut commands = Vec::new();
        let set = |flag: &str, value: Option<String>| {
            let mut args = vec!["set".to_string(), flag.to_string()];
            args.extend(value);
            args.push(vm_name.to_string());
            args
        };

        if let Some(cpu) = self.cpu {
            commands.push(set("--cpu", Some(cpu.to_string())));
        }
        if let Some(memory) = self.memory_mb {
            commands.push(set("--memory", Some(memory.to_string())));
        }
        if self.random_mac {
            commands.push(set("--random-mac", None));
        }
        if let Some(display) = &self.display {
            commands.push(set("--display", Some(display.clone())));
        }

        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_config_runs_headless() {
        let spec = VmRunSpec::from_config("org/image:latest", &DriverConfig::default());
        assert_eq!(spec.run_args("job-42"), strings(&["run", "--no-graphics", "job-42"]));
    }

    #[test]
    fn run_args_follow_engine_flag_order() {
        let config = DriverConfig {
            network: NetworkMode::Softnet {
                allow: Some("10.0.0.0/8".into()),
            },
            root_disk_opts: Some("sync=none".into()),
            headless: false,
            nested: true,
            ..DriverConfig::default()
        };

        let spec = VmRunSpec::from_config("img", &config)
            .with_dirs(["/data:ro"])
            .with_disks(["/dev/disk4"])
            .with_host_mount(MountKind::Builds, "/tmp/builds", "42")
            .with_host_mount(MountKind::Cache, "/tmp/cache", "42");

        assert_eq!(
            spec.run_args("job-42"),
            strings(&[
                "run",
                "--net-softnet",
                "--net-softnet-allow",
                "10.0.0.0/8",
                "--root-disk-opts",
                "sync=none",
                "--nested",
                "--dir",
                "/data:ro",
                "--disk",
                "/dev/disk4",
                "--dir",
                "/tmp/builds:tag=tart.virtiofs.buildsdir.42",
                "--dir",
                "/tmp/cache:tag=tart.virtiofs.cachedir.42",
                "job-42",
            ])
        );
    }

    #[test]
    fn bridged_network_passes_interface() {
        let config = DriverConfig {
            network: NetworkMode::Bridged("en0".into()),
            ..DriverConfig::default()
        };
        let args = VmRunSpec::from_config("img", &config).run_args("job-1");
        assert_eq!(args, strings(&["run", "--net-bridged", "en0", "--no-graphics", "job-1"]));
    }

    #[test]
    fn set_commands_cover_overrides() {
        let config = DriverConfig {
            display: Some("1920x1080".into()),
            ..DriverConfig::default()
        };
        let spec = VmRunSpec::from_config("img", &config)
            .with_cpu(Some(4))
            .with_memory_mb(Some(8192));

        assert_eq!(
            spec.set_commands("job-1"),
            vec![
                strings(&["set", "--cpu", "4", "job-1"]),
                strings(&["set", "--memory", "8192", "job-1"]),
                strings(&["set", "--random-mac", "job-1"]),
                strings(&["set", "--display", "1920x1080", "job-1"]),
            ]
        );
    }

    #[test]
    fn no_overrides_means_no_set_commands() {
        let config = DriverConfig {
            random_mac: false,
            ..DriverConfig::default()
        };
        assert!(VmRunSpec::from_config("img", &config).set_commands("job-1").is_empty());
    }
}
