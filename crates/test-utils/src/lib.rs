pub mod env_builder;
pub mod fake_connector;
pub mod fake_engine;

use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tart_executor::config::ExecutorConfig;
use tart_executor::env::Environment;
use tart_executor::stages::Orchestrator;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

pub use env_builder::JobEnvBuilder;
pub use fake_connector::{FakeConnector, ShellCall};
pub use fake_engine::{EngineCall, FakeEngine};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

static NEXT_JOB: AtomicU32 = AtomicU32::new(1);

/// A job id no other test in this process uses.
///
/// Job ids end up in host paths under the temp dir (run logs, host mount
/// dirs), so tests must not share them.
pub fn unique_job_id() -> String {
    format!("{}{:04}", std::process::id(), NEXT_JOB.fetch_add(1, Ordering::SeqCst))
}

/// Orchestrator over fakes, with a fast retry delay and no output relay.
pub fn orchestrator(
    env: Environment,
    engine: Arc<FakeEngine>,
    connector: Arc<FakeConnector>,
    cancel: CancellationToken,
) -> Orchestrator {
    let config = ExecutorConfig::from_environment(&env).expect("valid driver config");
    Orchestrator::new(config, env, engine, connector, cancel)
        .with_retry_delay(Duration::from_millis(1))
        .without_output_relay()
}
