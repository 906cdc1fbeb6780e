// src/config/mod.rs

//! Driver configuration.
//!
//! Responsibilities:
//! - Define the typed configuration model (`model.rs`).
//! - Load the driver configuration group from the environment (`loader.rs`).
//! - Validate the builds/cache mount options of the configure stage
//!   (`validate.rs`).
//!
//! The result is an immutable [`ExecutorConfig`] built once per process and
//! handed to the stage orchestrator.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{CONFIG_PREFIX, driver_var};
pub use model::{DriverConfig, ExecutorConfig, ExitCodes, MountKind, NetworkMode};
pub use validate::{MountChoice, MountRequest, validate_mount};
