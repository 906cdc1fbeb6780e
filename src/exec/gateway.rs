// src/exec/gateway.rs

//! Production engine gateway.
//!
//! Locates the engine binary, runs short-lived subcommands to completion
//! (`clone`, `set`, `ip`, `get`, `stop`, `delete`, `pull`) and starts the one
//! long-lived subcommand (`run`) as a detached process.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::env::{EnvOverrides, Environment};
use crate::errors::{EngineError, EngineOutputDump};

use super::backend::{Engine, EngineFuture, EngineOutput};

pub const ENGINE_NAME: &str = "tart";

/// Where Homebrew installs the engine on Apple Silicon. The runner is often
/// started from a launchd agent with a minimal `PATH` that does not include
/// this directory.
pub const ENGINE_FALLBACK_PATH: &str = "/opt/homebrew/bin/tart";

#[derive(Debug, Clone)]
pub struct EngineGateway {
    name: String,
    search_path: Option<OsString>,
    fallback: PathBuf,
    base_env: EnvOverrides,
}

impl EngineGateway {
    /// Gateway for the default engine, searched for in the `PATH` of `env`.
    pub fn new(env: &Environment) -> Self {
        Self::with_binary(
            ENGINE_NAME,
            env.get("PATH").map(OsString::from),
            ENGINE_FALLBACK_PATH,
        )
    }

    pub fn with_binary(
        name: impl Into<String>,
        search_path: Option<OsString>,
        fallback: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            search_path,
            fallback: fallback.into(),
            base_env: EnvOverrides::new(),
        }
    }

    /// Set an environment variable on every engine invocation made through
    /// this gateway.
    pub fn with_base_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base_env.insert(key.into(), value.into());
        self
    }

    pub fn base_env(&self) -> &EnvOverrides {
        &self.base_env
    }

    /// Resolve the engine binary: `PATH` first, then the fallback location.
    pub fn locate(&self) -> Result<PathBuf, EngineError> {
        if let Some(search_path) = &self.search_path {
            for dir in std::env::split_paths(search_path) {
                let candidate = dir.join(&self.name);
                if is_executable(&candidate) {
                    return Ok(candidate);
                }
            }
        }

        if is_executable(&self.fallback) {
            return Ok(self.fallback.clone());
        }

        Err(EngineError::NotFound {
            name: self.name.clone(),
            fallback: self.fallback.display().to_string(),
        })
    }

    async fn execute_inner(
        &self,
        args: &[String],
        env: &EnvOverrides,
        cancel: &CancellationToken,
    ) -> Result<EngineOutput, EngineError> {
        let binary = self.locate()?;
        let command = format!("{} {}", self.name, args.join(" "));

        debug!(binary = %binary.display(), ?args, "running engine command");

        let mut cmd = Command::new(&binary);
        cmd.args(args)
            .envs(&self.base_env)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| EngineError::Exec {
            binary: binary.display().to_string(),
            source,
        })?;

        // Dropping the wait future on cancellation drops the child, which
        // kills it thanks to kill_on_drop(true).
        let output = tokio::select! {
            res = child.wait_with_output() => res.map_err(|source| EngineError::Exec {
                binary: binary.display().to_string(),
                source,
            })?,
            _ = cancel.cancelled() => {
                warn!(%command, "cancellation requested; killing engine process");
                return Err(EngineError::Cancelled { command });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let summary = first_non_empty_line(&[&stderr, &stdout]).to_string();
            debug!(
                %command,
                exit_code = ?output.status.code(),
                %summary,
                "engine command failed"
            );
            return Err(EngineError::CommandFailed {
                summary,
                code: output.status.code(),
                output: EngineOutputDump { stdout, stderr },
            });
        }

        Ok(EngineOutput { stdout, stderr })
    }
}

impl Engine for EngineGateway {
    fn execute<'a>(
        &'a self,
        args: &'a [String],
        env: &'a EnvOverrides,
        cancel: &'a CancellationToken,
    ) -> EngineFuture<'a> {
        Box::pin(self.execute_inner(args, env, cancel))
    }

    fn launch_detached(
        &self,
        args: &[String],
        env: &EnvOverrides,
        log_path: &Path,
    ) -> Result<(), EngineError> {
        let binary = self.locate()?;
        let exec_error = |source: io::Error| EngineError::Exec {
            binary: binary.display().to_string(),
            source,
        };

        let log = open_log_for_append(log_path).map_err(exec_error)?;
        let log_for_stderr = log.try_clone().map_err(exec_error)?;

        let mut cmd = std::process::Command::new(&binary);
        cmd.args(args)
            .envs(&self.base_env)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_for_stderr));

        detach_into_new_session(&mut cmd);

        let child = cmd.spawn().map_err(exec_error)?;

        info!(
            pid = child.id(),
            log = %log_path.display(),
            ?args,
            "started detached engine process"
        );

        // Release the handle without waiting: the child must outlive us.
        drop(child);

        Ok(())
    }
}

/// A regular file we may run. Files without any execute bit are skipped on
/// `PATH` just like the shell skips them.
fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

fn open_log_for_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }

    options.open(path)
}

fn detach_into_new_session(cmd: &mut std::process::Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

/// First non-empty line across `outputs`, checked in order.
pub fn first_non_empty_line<'a>(outputs: &[&'a str]) -> &'a str {
    outputs
        .iter()
        .flat_map(|output| output.lines())
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
}
