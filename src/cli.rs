// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::stages::{ConfigureOptions, PrepareOptions, RunOptions, StageCommand};

/// Command-line arguments for `tart-executor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tart-executor",
    version,
    about = "Run CI jobs in ephemeral Tart virtual machines (custom executor driver).",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TART_EXECUTOR_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Configure the runner: decide builds/cache locations.
    Config(ConfigArgs),
    /// Clone, boot and provision a VM for the job.
    Prepare(PrepareArgs),
    /// Run one job script inside the VM.
    Run(RunArgs),
    /// Stop and delete the job's VM.
    Cleanup,
}

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Host directory for builds, shared into the guest (mutually exclusive
    /// with `--guest-builds-dir`).
    #[arg(long, value_name = "PATH")]
    pub builds_dir: Option<String>,

    /// Host directory for caches, shared into the guest (mutually exclusive
    /// with `--guest-cache-dir`).
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<String>,

    /// Guest directory for builds, e.g. on a volume attached with `--disk`.
    #[arg(long, value_name = "PATH")]
    pub guest_builds_dir: Option<String>,

    /// Guest directory for caches, e.g. on a volume attached with `--disk`.
    #[arg(long, value_name = "PATH")]
    pub guest_cache_dir: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct PrepareArgs {
    /// Maximum number of concurrently running VMs, used to split `auto`
    /// resources.
    #[arg(long, default_value_t = 1)]
    pub concurrency: u64,

    /// Override the image's CPU count (a number or `auto`).
    #[arg(long, value_name = "N|auto")]
    pub cpu: Option<String>,

    /// Override the image's memory size in megabytes (a number or `auto`).
    #[arg(long, value_name = "MB|auto")]
    pub memory: Option<String>,

    /// `--dir` argument passed to the engine's `run`; may be repeated.
    #[arg(long = "dir", value_name = "SPEC")]
    pub dirs: Vec<String>,

    /// `--disk` argument passed to the engine's `run`; may be repeated.
    #[arg(long = "disk", value_name = "SPEC")]
    pub disks: Vec<String>,

    /// Whether the engine may auto-prune its image caches.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
    pub auto_prune: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Script generated by the runner.
    pub script: PathBuf,

    /// Runner sub-stage name.
    pub stage: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Command {
    pub fn into_stage(self) -> StageCommand {
        match self {
            Command::Config(args) => StageCommand::Configure(ConfigureOptions {
                builds_dir: args.builds_dir,
                cache_dir: args.cache_dir,
                guest_builds_dir: args.guest_builds_dir,
                guest_cache_dir: args.guest_cache_dir,
            }),
            Command::Prepare(args) => StageCommand::Prepare(PrepareOptions {
                concurrency: args.concurrency,
                cpu: args.cpu,
                memory: args.memory,
                dirs: args.dirs,
                disks: args.disks,
                auto_prune: args.auto_prune,
            }),
            Command::Run(args) => StageCommand::Run(RunOptions {
                script: args.script,
                stage: args.stage,
            }),
            Command::Cleanup => StageCommand::Cleanup,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(args: &[&str]) -> StageCommand {
        CliArgs::try_parse_from(args).unwrap().command.into_stage()
    }

    #[test]
    fn config_flags() {
        let cmd = stage(&["tart-executor", "config", "--builds-dir", "/b", "--guest-cache-dir", "/c"]);
        assert_eq!(
            cmd,
            StageCommand::Configure(ConfigureOptions {
                builds_dir: Some("/b".into()),
                guest_cache_dir: Some("/c".into()),
                ..ConfigureOptions::default()
            })
        );
    }

    #[test]
    fn prepare_flags_repeat_and_default() {
        let cmd = stage(&[
            "tart-executor",
            "prepare",
            "--cpu",
            "auto",
            "--dir",
            "a:/x",
            "--dir",
            "b:/y",
            "--auto-prune",
            "false",
        ]);
        match cmd {
            StageCommand::Prepare(opts) => {
                assert_eq!(opts.concurrency, 1);
                assert_eq!(opts.cpu.as_deref(), Some("auto"));
                assert_eq!(opts.dirs, vec!["a:/x", "b:/y"]);
                assert!(!opts.auto_prune);
            }
            other => panic!("expected prepare, got {other:?}"),
        }

        match stage(&["tart-executor", "prepare"]) {
            StageCommand::Prepare(opts) => assert!(opts.auto_prune),
            other => panic!("expected prepare, got {other:?}"),
        }
    }

    #[test]
    fn run_takes_script_and_optional_stage() {
        let cmd = stage(&["tart-executor", "--log-level", "debug", "run", "/tmp/script", "build_script"]);
        assert_eq!(
            cmd,
            StageCommand::Run(RunOptions {
                script: PathBuf::from("/tmp/script"),
                stage: Some("build_script".into()),
            })
        );
    }

    #[test]
    fn run_requires_a_script() {
        assert!(CliArgs::try_parse_from(["tart-executor", "run"]).is_err());
    }
}
