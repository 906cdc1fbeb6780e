// src/exec/mod.rs

//! Engine execution layer.
//!
//! Everything the driver asks of the external VM engine goes through the
//! [`Engine`] trait:
//!
//! - [`backend`] defines the trait, its output type and the future alias.
//! - [`gateway`] is the production implementation that locates the engine
//!   binary, runs it with `tokio::process::Command`, and spawns the detached
//!   long-lived `run` process.
//!
//! Tests swap in a fake engine that records invocations instead of spawning
//! processes.

pub mod backend;
pub mod gateway;

pub use backend::{Engine, EngineFuture, EngineOutput};
pub use gateway::{
    ENGINE_FALLBACK_PATH, ENGINE_NAME, EngineGateway, first_non_empty_line,
};
