// src/stages/provision.rs

//! Guest provisioning steps run by `prepare` once a session is open:
//! installing the runner agent, setting the timezone and mounting shared
//! host directories.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::connect::shell_quote;
use crate::errors::{ExecutorError, Result};
use crate::vm::GuestOs;

const INSTALL_BREW_SCRIPT: &str = include_str!("scripts/install-gitlab-runner-brew.sh");
const INSTALL_CURL_SCRIPT: &str = include_str!("scripts/install-gitlab-runner-curl.sh");
const INSTALL_AUTO_SCRIPT: &str = include_str!("scripts/install-gitlab-runner-auto.sh");

const INSTALL_VAR: &str = "TART_EXECUTOR_INSTALL_GITLAB_RUNNER";

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)$").expect("valid regex"));

/// How the runner agent gets into the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallMethod {
    Brew,
    Curl,
    /// A specific release, downloaded with curl.
    Version(String),
    /// Legacy boolean values: pick a method inside the guest.
    Auto,
}

impl InstallMethod {
    /// `None` when nothing should be installed.
    pub fn parse(value: Option<&str>) -> Result<Option<Self>> {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };

        let method = match value {
            "brew" => InstallMethod::Brew,
            "curl" => InstallMethod::Curl,
            "true" | "yes" | "on" => {
                warn!(
                    "{value:?} value for {INSTALL_VAR} is deprecated, \
                     please use either \"brew\", \"curl\" or \"major.minor.patch\""
                );
                InstallMethod::Auto
            }
            other => match VERSION.captures(other) {
                Some(caps) => InstallMethod::Version(format!("{}.{}.{}", &caps[1], &caps[2], &caps[3])),
                None => {
                    return Err(ExecutorError::Configuration(format!(
                        "{INSTALL_VAR} only accepts \"brew\", \"curl\" or \"major.minor.patch\", got {other:?}"
                    )));
                }
            },
        };

        Ok(Some(method))
    }

    /// Script text to pipe into the guest shell.
    pub fn script(&self) -> String {
        match self {
            InstallMethod::Brew => INSTALL_BREW_SCRIPT.to_string(),
            InstallMethod::Curl => INSTALL_CURL_SCRIPT.to_string(),
            InstallMethod::Auto => INSTALL_AUTO_SCRIPT.to_string(),
            InstallMethod::Version(version) => {
                format!("GITLAB_RUNNER_VERSION='v{version}'\n{INSTALL_CURL_SCRIPT}")
            }
        }
    }
}

static TIMEZONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_-]+(/[a-zA-Z_-]+)*$").expect("valid regex"));

const ZONEINFO_PREFIX: &str = "/var/db/timezone/zoneinfo/";

/// Validate a timezone name. `auto` means the host's own timezone, read
/// from where `localtime` points.
pub fn resolve_timezone(value: &str, localtime: &Path) -> Result<String> {
    let tz = if value == "auto" {
        let target = std::fs::read_link(localtime).map_err(|e| {
            ExecutorError::Configuration(format!(
                "failed to parse timezone: while reading {}: {e}",
                localtime.display()
            ))
        })?;
        let target = target.to_string_lossy();
        let name = target
            .strip_prefix(ZONEINFO_PREFIX)
            .or_else(|| target.split_once("/zoneinfo/").map(|(_, tz)| tz))
            .unwrap_or(&target);

        // systemsetup(8) knows GMT but not UTC
        if name == "UTC" { "GMT".to_string() } else { name.to_string() }
    } else {
        value.to_string()
    };

    if !TIMEZONE.is_match(&tz) {
        return Err(ExecutorError::Configuration(format!(
            "failed to parse timezone {tz:?}: doesn't match the regular expression {}",
            TIMEZONE.as_str()
        )));
    }

    Ok(tz)
}

pub fn timezone_command(os: &GuestOs, tz: &str) -> String {
    match os {
        GuestOs::Linux => format!("sudo timedatectl set-timezone {tz}"),
        _ => format!("sudo systemsetup settimezone {tz}"),
    }
}

/// Command mounting the virtiofs share `tag` at `guest_dir`.
pub fn mount_command(os: &GuestOs, tag: &str, guest_dir: &str) -> Result<String> {
    let dir = shell_quote(guest_dir);
    match os {
        GuestOs::Darwin => Ok(format!("mkdir -p {dir} && sudo mount_virtiofs {tag} {dir}")),
        GuestOs::Linux => Ok(format!("sudo mkdir -p {dir} && sudo mount -t virtiofs {tag} {dir}")),
        GuestOs::Other(name) => Err(ExecutorError::Configuration(format!(
            "don't know how to mount host directories in a {name:?} guest"
        ))),
    }
}
