// src/connect/retry.rs

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::{ExecutorError, Result};

/// Delay between attempts when nothing else is configured.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Run `op` until it succeeds, waiting `delay` between attempts.
///
/// There is no attempt cap. The only way out other than success is `cancel`
/// firing, which yields [`ExecutorError::Connectivity`] carrying the last
/// attempt's error. `op` receives the 1-based attempt number.
pub async fn retry_until_cancelled<T, E, F, Fut>(
    what: &str,
    delay: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(what, attempt, last_error));
        }
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = op(attempt) => Some(res),
        };

        match outcome {
            None => return Err(cancelled(what, attempt - 1, last_error)),
            Some(Ok(value)) => {
                if attempt > 1 {
                    info!(what, attempt, "succeeded after retrying");
                }
                return Ok(value);
            }
            Some(Err(e)) => {
                warn!(what, attempt, error = %e, "attempt failed, will re-try");
                last_error = Some(e.to_string());
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(what, attempt, last_error)),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn cancelled(what: &str, attempts: u32, last_error: Option<String>) -> ExecutorError {
    let mut msg = format!("{what}: cancelled after {attempts} attempt(s)");
    if let Some(e) = last_error {
        msg.push_str(&format!(", last error: {e}"));
    }
    ExecutorError::Connectivity(msg)
}
