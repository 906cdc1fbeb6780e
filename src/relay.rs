// src/relay.rs

//! Output relay: tails a VM's run log and copies new bytes to our stdout.
//!
//! The detached `run` process started in `prepare` keeps appending its console
//! output to the identity's log file. Later stage processes spawn this relay
//! so that output shows up in the job log while they do their own work.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::vm::VmIdentity;

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Spawn a background relay for `identity` writing to this process's stdout.
///
/// The task is never joined: the process may exit while it sleeps, the log
/// file outlives us.
pub fn spawn(identity: &VmIdentity) -> JoinHandle<()> {
    let path = identity.log_path();
    tokio::spawn(async move {
        relay_file(&path, tokio::io::stdout()).await;
    })
}

/// Open `path` and follow it into `out` forever.
///
/// A missing file is reported on stderr and ends the relay.
pub async fn relay_file<W>(path: &Path, out: W)
where
    W: AsyncWrite + Unpin,
{
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            eprintln!(
                "Failed to open VM's output file {}, looks like the VM wasn't started in \"prepare\" stage?",
                path.display()
            );
            return;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to open VM's output file");
            return;
        }
    };

    debug!(path = %path.display(), "relaying VM output");
    follow(file, out, POLL_INTERVAL).await;
}

/// Copy everything readable from `src` to `out`; on EOF sleep `interval` and
/// try again. Returns only on a read or write error.
pub async fn follow<R, W>(mut src: R, mut out: W, interval: Duration)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8 * 1024];

    loop {
        let n = match src.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                eprintln!("Failed to display VM's output: {e}");
                return;
            }
        };

        if n == 0 {
            tokio::time::sleep(interval).await;
            continue;
        }

        if let Err(e) = write_chunk(&mut out, &buf[..n]).await {
            eprintln!("Failed to display VM's output: {e}");
            return;
        }
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(out: &mut W, chunk: &[u8]) -> std::io::Result<()> {
    out.write_all(chunk).await?;
    out.flush().await
}
