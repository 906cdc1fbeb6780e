// src/config/validate.rs

//! Validation of the configure stage's mount options.
//!
//! For each logical mount (builds, cache) the runner operator can pick at
//! most one of:
//! - a per-job temporary host directory (`TART_EXECUTOR_HOST_DIR` /
//!   `TART_EXECUTOR_HOST_CACHE_DIR`),
//! - an explicit host directory (`--builds-dir` / `--cache-dir`),
//! - an explicit guest-only directory (`--guest-builds-dir` /
//!   `--guest-cache-dir`).
//!
//! The two mounts are checked independently.

use crate::config::model::MountKind;
use crate::errors::{ExecutorError, Result};

/// Raw options for one logical mount, as given on the command line and in
/// the driver configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountRequest {
    pub host_mount: bool,
    pub host_dir: Option<String>,
    pub guest_dir: Option<String>,
}

/// The validated decision for one logical mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountChoice {
    /// Guest-local directory at the default path.
    Default,
    /// A per-job temporary directory on the host, mounted into the guest.
    HostTemp,
    /// An operator-provided host directory, mounted into the guest.
    HostDir(String),
    /// An operator-provided guest-only path (e.g. on a `--disk` volume).
    GuestDir(String),
}

pub fn validate_mount(kind: MountKind, request: &MountRequest) -> Result<MountChoice> {
    let host_mount_var = kind.host_mount_var();
    let host_flag = kind.host_dir_flag();
    let guest_flag = kind.guest_dir_flag();

    let host_dir = request.host_dir.as_deref().filter(|s| !s.is_empty());
    let guest_dir = request.guest_dir.as_deref().filter(|s| !s.is_empty());

    if request.host_mount && host_dir.is_some() {
        return Err(mutually_exclusive(host_flag, host_mount_var));
    }
    if request.host_mount && guest_dir.is_some() {
        return Err(mutually_exclusive(guest_flag, host_mount_var));
    }
    if host_dir.is_some() && guest_dir.is_some() {
        return Err(mutually_exclusive(host_flag, guest_flag));
    }

    Ok(match (request.host_mount, host_dir, guest_dir) {
        (true, _, _) => MountChoice::HostTemp,
        (false, Some(dir), _) => MountChoice::HostDir(dir.to_string()),
        (false, None, Some(dir)) => MountChoice::GuestDir(dir.to_string()),
        (false, None, None) => MountChoice::Default,
    })
}

fn mutually_exclusive(a: &str, b: &str) -> ExecutorError {
    ExecutorError::Configuration(format!("{a} and {b} are mutually exclusive"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host_mount: bool, host_dir: Option<&str>, guest_dir: Option<&str>) -> MountRequest {
        MountRequest {
            host_mount,
            host_dir: host_dir.map(str::to_string),
            guest_dir: guest_dir.map(str::to_string),
        }
    }

    #[test]
    fn at_most_one_option_is_accepted() {
        for kind in MountKind::ALL {
            for mask in 0u8..8 {
                let req = request(
                    mask & 1 != 0,
                    (mask & 2 != 0).then_some("/host"),
                    (mask & 4 != 0).then_some("/guest"),
                );
                let result = validate_mount(kind, &req);
                if mask.count_ones() > 1 {
                    assert!(
                        matches!(result, Err(ExecutorError::Configuration(_))),
                        "{kind:?} mask {mask:03b} should be rejected"
                    );
                } else {
                    assert!(result.is_ok(), "{kind:?} mask {mask:03b} should be accepted");
                }
            }
        }
    }

    #[test]
    fn error_names_the_conflicting_options() {
        let err = validate_mount(MountKind::Builds, &request(true, Some("/host"), None)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--builds-dir"));
        assert!(msg.contains("TART_EXECUTOR_HOST_DIR"));

        let err = validate_mount(MountKind::Cache, &request(false, Some("/a"), Some("/b"))).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("--cache-dir"));
        assert!(msg.contains("--guest-cache-dir"));
    }

    #[test]
    fn empty_strings_count_as_unset() {
        let choice = validate_mount(MountKind::Builds, &request(true, Some(""), Some(""))).unwrap();
        assert_eq!(choice, MountChoice::HostTemp);
    }

    #[test]
    fn choices_map_to_the_single_option_given() {
        assert_eq!(
            validate_mount(MountKind::Cache, &request(false, None, None)).unwrap(),
            MountChoice::Default
        );
        assert_eq!(
            validate_mount(MountKind::Cache, &request(false, Some("/c"), None)).unwrap(),
            MountChoice::HostDir("/c".into())
        );
        assert_eq!(
            validate_mount(MountKind::Cache, &request(false, None, Some("/g"))).unwrap(),
            MountChoice::GuestDir("/g".into())
        );
    }
}
