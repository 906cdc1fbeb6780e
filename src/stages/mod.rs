// src/stages/mod.rs

//! Stage orchestration.
//!
//! The CI runner starts this binary once per stage. [`Orchestrator`] holds
//! what every stage needs (configuration, environment snapshot, engine,
//! remote-shell connector and the process-wide cancellation token) and
//! [`Orchestrator::dispatch`] runs one stage and classifies its result.

pub mod cleanup;
pub mod configure;
pub mod handoff;
pub mod outcome;
pub mod prepare;
pub mod provision;
pub mod run;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::ExecutorConfig;
use crate::connect::{ConnectivityManager, Connector, DEFAULT_RETRY_DELAY};
use crate::env::Environment;
use crate::exec::Engine;
use crate::relay;
use crate::vm::{VmIdentity, VmSupervisor};

pub use configure::{ConfigureOptions, ConfigurePayload};
pub use handoff::Handoff;
pub use outcome::StageOutcome;
pub use prepare::PrepareOptions;
pub use run::{BUILD_EXIT_CODE_FILE_VAR, RunOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageCommand {
    Configure(ConfigureOptions),
    Prepare(PrepareOptions),
    Run(RunOptions),
    Cleanup,
}

impl StageCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StageCommand::Configure(_) => "config",
            StageCommand::Prepare(_) => "prepare",
            StageCommand::Run(_) => "run",
            StageCommand::Cleanup => "cleanup",
        }
    }
}

pub struct Orchestrator {
    config: ExecutorConfig,
    env: Environment,
    engine: Arc<dyn Engine>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
    retry_delay: Duration,
    relay_output: bool,
}

impl Orchestrator {
    pub fn new(
        config: ExecutorConfig,
        env: Environment,
        engine: Arc<dyn Engine>,
        connector: Arc<dyn Connector>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            env,
            engine,
            connector,
            cancel,
            retry_delay: DEFAULT_RETRY_DELAY,
            relay_output: true,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Don't tail the VM's run log to stdout.
    pub fn without_output_relay(mut self) -> Self {
        self.relay_output = false;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run one stage. `configure` prints its payload as JSON on stdout.
    pub async fn dispatch(&self, command: &StageCommand) -> StageOutcome {
        let result = match command {
            StageCommand::Configure(options) => match self.configure(options).await {
                Ok(payload) => print_payload(&payload),
                Err(e) => Err(e),
            },
            StageCommand::Prepare(options) => self.prepare(options).await,
            StageCommand::Run(options) => self.run(options).await,
            StageCommand::Cleanup => self.cleanup().await,
        };

        let outcome = StageOutcome::from(result);
        match &outcome {
            StageOutcome::Success => {}
            StageOutcome::BuildFailure(status) => {
                error!(stage = command.name(), status, "job script failed");
            }
            StageOutcome::SystemFailure(e) => {
                error!(stage = command.name(), error = %e, "stage failed");
            }
        }
        outcome
    }

    fn supervisor(&self) -> VmSupervisor<'_> {
        VmSupervisor::new(self.engine.as_ref(), &self.cancel)
    }

    fn connectivity(&self) -> ConnectivityManager<'_> {
        ConnectivityManager::new(self.engine.as_ref(), self.connector.as_ref(), &self.cancel)
            .with_retry_delay(self.retry_delay)
    }

    fn start_relay(&self, identity: &VmIdentity) {
        if self.relay_output {
            // Fire and forget: the process may exit while the relay sleeps.
            let _ = relay::spawn(identity);
        }
    }
}

fn print_payload(payload: &ConfigurePayload) -> crate::errors::Result<()> {
    let json = serde_json::to_string_pretty(payload).map_err(anyhow::Error::from)?;
    println!("{json}");
    Ok(())
}
