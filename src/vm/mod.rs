// src/vm/mod.rs

//! VM lifecycle on top of the engine gateway.
//!
//! - [`identity`] derives the per-job VM name and the files keyed by it.
//! - [`spec`] holds the immutable description of how to run the VM and
//!   renders it into engine arguments.
//! - [`supervisor`] clones, configures, launches (detached), inspects, stops
//!   and deletes VM instances.

pub mod identity;
pub mod spec;
pub mod supervisor;

pub use identity::{VmIdentity, VmProcessHandle, host_mount_dir};
pub use spec::{DirectoryMount, VmRunSpec};
pub use supervisor::{GuestOs, PullOptions, VmInfo, VmSupervisor};
