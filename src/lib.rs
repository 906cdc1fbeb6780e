// src/lib.rs

pub mod cli;
pub mod config;
pub mod connect;
pub mod context;
pub mod env;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod relay;
pub mod stages;
pub mod vm;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::CliArgs;
use crate::config::{ExecutorConfig, ExitCodes};
use crate::connect::SshConnector;
use crate::env::Environment;
use crate::exec::EngineGateway;
use crate::stages::{Orchestrator, StageCommand, StageOutcome};

/// Engine variable that turns off the engine's own cache pruning.
pub const NO_AUTO_PRUNE_VAR: &str = "TART_NO_AUTO_PRUNE";

/// High-level entry point used by `main.rs`.
///
/// Builds the configuration once, wires the production engine and remote
/// shell transport into an [`Orchestrator`], runs the requested stage and
/// returns the process exit code the runner expects.
pub async fn run(args: CliArgs, env: Environment) -> i32 {
    let stage = args.command.into_stage();
    let exit_codes = ExitCodes::from_environment(&env);

    let cancel = CancellationToken::new();
    cancel_on_signals(cancel.clone());

    let outcome = match build_orchestrator(&stage, env, cancel) {
        Ok(orchestrator) => orchestrator.dispatch(&stage).await,
        Err(e) => {
            error!(stage = stage.name(), error = %e, "failed to initialise");
            StageOutcome::SystemFailure(e)
        }
    };

    outcome.exit_code(&exit_codes)
}

fn build_orchestrator(
    stage: &StageCommand,
    env: Environment,
    cancel: CancellationToken,
) -> errors::Result<Orchestrator> {
    let config = ExecutorConfig::from_environment(&env)?;
    let engine = engine_for(stage, &env);
    let connector = SshConnector::new(cancel.clone())?;

    Ok(Orchestrator::new(
        config,
        env,
        Arc::new(engine),
        Arc::new(connector),
        cancel,
    ))
}

/// Production engine gateway for `stage`.
pub fn engine_for(stage: &StageCommand, env: &Environment) -> EngineGateway {
    let gateway = EngineGateway::new(env);
    match stage {
        StageCommand::Prepare(options) if !options.auto_prune => gateway.with_base_env(NO_AUTO_PRUNE_VAR, "true"),
        _ => gateway,
    }
}

/// Ctrl-C / SIGTERM → cancel every retry loop and engine call in flight.
fn cancel_on_signals(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    eprintln!("failed to listen for SIGTERM: {e}");
                    return;
                }
            };
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        eprintln!("failed to listen for Ctrl+C: {e}");
                        return;
                    }
                }
                _ = term.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
        }

        info!("interrupted, cancelling");
        cancel.cancel();
    });
}
