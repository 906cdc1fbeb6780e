// src/connect/ssh.rs

//! Production transport: the system OpenSSH client.
//!
//! Password authentication goes through `SSH_ASKPASS`, pointed back at our
//! own executable. When started with [`ASKPASS_SECRET_ENV`] set, `main`
//! prints that secret and exits before doing anything else, which is all
//! `ssh` needs from an askpass helper.
//!
//! The client exits 255 on its own failures, which a job script can do too.
//! Job scripts therefore run under a small wrapper that reports the guest
//! shell's status on stderr, and only a missing report falls back to the
//! client's exit status.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{ExecutorError, Result};

use super::session::{CommandOutput, ConnectionSpec, Connector, RemoteSession, SessionFuture};

/// Carries the password from us to our askpass-mode child.
pub const ASKPASS_SECRET_ENV: &str = "TART_EXECUTOR_SSH_ASKPASS_SECRET";

/// Exit status the OpenSSH client uses for its own failures.
const SSH_CLIENT_FAILURE: i32 = 255;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of the stderr line carrying the guest shell's exit status.
const EXIT_STATUS_MARKER: &str = "__TART_EXECUTOR_EXIT_STATUS__=";

/// Host keys change with every fresh clone, so they are never checked or
/// recorded.
const SSH_OPTS: &[&str] = &[
    "-o", "StrictHostKeyChecking=no",
    "-o", "UserKnownHostsFile=/dev/null",
    "-o", "LogLevel=ERROR",
    "-o", "PreferredAuthentications=password,keyboard-interactive",
    "-o", "PubkeyAuthentication=no",
    "-o", "NumberOfPasswordPrompts=1",
    "-o", "ConnectTimeout=10",
    "-o", "ServerAliveInterval=30",
];

/// Secret to print when this process was started as an askpass helper.
pub fn askpass_reply() -> Option<String> {
    std::env::var(ASKPASS_SECRET_ENV).ok()
}

#[derive(Debug, Clone)]
pub struct SshConnector {
    ssh_binary: PathBuf,
    askpass_program: PathBuf,
    cancel: CancellationToken,
}

impl SshConnector {
    pub fn new(cancel: CancellationToken) -> Result<Self> {
        Ok(Self {
            ssh_binary: PathBuf::from("ssh"),
            askpass_program: std::env::current_exe()?,
            cancel,
        })
    }

    /// Use `binary` instead of the `ssh` found on `PATH`.
    pub fn with_ssh_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.ssh_binary = binary.into();
        self
    }
}

impl Connector for SshConnector {
    fn dial<'a>(&'a self, address: &'a str, port: u16) -> SessionFuture<'a, ()> {
        Box::pin(async move {
            let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((address, port)))
                .await
                .map_err(|_| ExecutorError::Connectivity(format!("dialing {address}:{port} timed out")))?
                .map_err(|e| ExecutorError::Connectivity(format!("dialing {address}:{port}: {e}")))?;
            drop(stream);
            Ok(())
        })
    }

    fn handshake<'a>(
        &'a self,
        address: &'a str,
        spec: &'a ConnectionSpec,
    ) -> SessionFuture<'a, Box<dyn RemoteSession>> {
        Box::pin(async move {
            let session = SshSession {
                ssh_binary: self.ssh_binary.clone(),
                askpass_program: self.askpass_program.clone(),
                address: address.to_string(),
                port: spec.port,
                username: spec.username.clone(),
                password: spec.password.clone(),
                cancel: self.cancel.clone(),
            };

            let check = session.run_inner("true").await?;
            if !check.success() {
                return Err(ExecutorError::Connectivity(format!(
                    "handshake command exited with status {}",
                    check.status
                )));
            }

            debug!(%address, port = spec.port, "remote session established");
            Ok(Box::new(session) as Box<dyn RemoteSession>)
        })
    }
}

pub struct SshSession {
    ssh_binary: PathBuf,
    askpass_program: PathBuf,
    address: String,
    port: u16,
    username: String,
    password: String,
    cancel: CancellationToken,
}

impl SshSession {
    fn command(&self, remote: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(SSH_OPTS)
            .arg("-T")
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-l")
            .arg(&self.username)
            .arg(&self.address);

        if let Some(remote) = remote {
            cmd.arg("--").arg(remote);
        }

        cmd.env("SSH_ASKPASS", &self.askpass_program)
            .env("SSH_ASKPASS_REQUIRE", "force")
            .env(ASKPASS_SECRET_ENV, &self.password)
            .kill_on_drop(true);
        cmd
    }

    async fn run_inner(&self, command: &str) -> Result<CommandOutput> {
        let mut cmd = self.command(Some(command));
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let child = cmd.spawn()?;
        let output = tokio::select! {
            res = child.wait_with_output() => res?,
            _ = self.cancel.cancelled() => {
                return Err(ExecutorError::Connectivity("remote command cancelled".into()));
            }
        };

        let status = client_status(output.status)?;
        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn shell_inner(&self, shell: Option<&str>, stdin: Vec<u8>) -> Result<i32> {
        let mut cmd = self.command(Some(&status_wrapper(shell)));
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;

        // Feed stdin concurrently so a chatty guest can't deadlock us on a
        // full pipe. Closing stdin ends the shell once the script is done.
        let writer = child.stdin.take().map(|mut pipe| {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&stdin).await {
                    debug!(error = %e, "remote shell closed stdin early");
                }
            })
        });
        let stderr = child.stderr.take();

        let finished = async {
            let forward = async {
                match stderr {
                    Some(stderr) => forward_stderr(stderr, tokio::io::stderr()).await,
                    None => None,
                }
            };
            let (status, reported) = tokio::join!(child.wait(), forward);
            status.map(|status| (status, reported))
        };

        let (status, reported) = tokio::select! {
            res = finished => res?,
            _ = self.cancel.cancelled() => {
                warn!("cancellation requested; closing remote shell");
                return Err(ExecutorError::Connectivity("remote shell cancelled".into()));
            }
        };

        if let Some(writer) = writer {
            writer.abort();
        }

        match reported {
            Some(code) => Ok(code),
            None => client_status(status),
        }
    }
}

/// Remote command running `shell` (or the user's login shell) on our stdin,
/// then printing its exit status after [`EXIT_STATUS_MARKER`] on stderr.
fn status_wrapper(shell: Option<&str>) -> String {
    let inner = shell.unwrap_or("\"${SHELL:-/bin/sh}\" -l");
    format!("{inner}; printf '{EXIT_STATUS_MARKER}%d\\n' \"$?\" >&2")
}

/// Split a stderr line into the part to show and the status it reports.
fn split_status(line: &[u8]) -> (&[u8], Option<i32>) {
    let marker = EXIT_STATUS_MARKER.as_bytes();
    let Some(pos) = line.windows(marker.len()).position(|w| w == marker) else {
        return (line, None);
    };

    let status = std::str::from_utf8(&line[pos + marker.len()..])
        .ok()
        .and_then(|rest| rest.trim().parse::<i32>().ok());
    match status {
        Some(status) => (&line[..pos], Some(status)),
        None => (line, None),
    }
}

/// Copy the remote stderr to `out`, minus the status line. Returns the
/// reported status, if the wrapper got to print it.
async fn forward_stderr<R, W>(src: R, mut out: W) -> Option<i32>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(src);
    let mut line = Vec::new();
    let mut reported = None;

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "remote stderr closed");
                break;
            }
        }

        let (shown, status) = split_status(&line);
        if status.is_some() {
            reported = status;
        }
        if shown.is_empty() {
            continue;
        }
        if out.write_all(shown).await.is_ok() {
            let _ = out.flush().await;
        }
    }

    reported
}

/// Map the client's exit status to the guest's, rejecting the client's own
/// failure status.
fn client_status(status: std::process::ExitStatus) -> Result<i32> {
    match status.code() {
        Some(SSH_CLIENT_FAILURE) => Err(ExecutorError::Connectivity(format!(
            "ssh client failed with status {SSH_CLIENT_FAILURE}"
        ))),
        Some(code) => Ok(code),
        None => Err(ExecutorError::Connectivity(
            "ssh client was terminated by a signal".into(),
        )),
    }
}

impl RemoteSession for SshSession {
    fn run<'a>(&'a self, command: &'a str) -> SessionFuture<'a, CommandOutput> {
        Box::pin(self.run_inner(command))
    }

    fn shell<'a>(&'a self, shell: Option<&'a str>, stdin: Vec<u8>) -> SessionFuture<'a, i32> {
        Box::pin(self.shell_inner(shell, stdin))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt as _;

    #[test]
    fn client_failure_status_is_a_connectivity_error() {
        let failed = std::process::ExitStatus::from_raw(255 << 8);
        assert!(matches!(client_status(failed), Err(ExecutorError::Connectivity(_))));

        let script_failed = std::process::ExitStatus::from_raw(3 << 8);
        assert_eq!(client_status(script_failed).unwrap(), 3);

        let killed = std::process::ExitStatus::from_raw(9);
        assert!(client_status(killed).is_err());
    }

    #[test]
    fn wrapper_reports_status_after_the_shell() {
        let wrapped = status_wrapper(Some("bash"));
        assert!(wrapped.starts_with("bash; printf"));
        assert!(wrapped.contains(EXIT_STATUS_MARKER));
        assert!(wrapped.ends_with("\"$?\" >&2"));

        assert!(status_wrapper(None).starts_with("\"${SHELL:-/bin/sh}\" -l;"));
    }

    #[test]
    fn split_status_finds_marker_mid_line() {
        let line = format!("partial{EXIT_STATUS_MARKER}255\n");
        let (shown, status) = split_status(line.as_bytes());
        assert_eq!(shown, b"partial");
        assert_eq!(status, Some(255));

        let plain = b"warning: something\n";
        assert_eq!(split_status(plain), (&plain[..], None));

        let garbled = format!("{EXIT_STATUS_MARKER}nope\n");
        assert_eq!(split_status(garbled.as_bytes()).1, None);
    }

    #[tokio::test]
    async fn forward_stderr_strips_status_line() {
        let remote = format!("first\nsecond\n{EXIT_STATUS_MARKER}255\n");
        let mut shown = Vec::new();

        let status = forward_stderr(remote.as_bytes(), &mut shown).await;

        assert_eq!(status, Some(255));
        assert_eq!(shown, b"first\nsecond\n");
    }

    #[tokio::test]
    async fn forward_stderr_without_report_returns_none() {
        let mut shown = Vec::new();
        let status = forward_stderr(&b"Connection closed by remote host\n"[..], &mut shown).await;

        assert_eq!(status, None);
        assert_eq!(shown, b"Connection closed by remote host\n");
    }

    #[tokio::test]
    async fn dial_reports_refused_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = SshConnector::new(CancellationToken::new()).unwrap();
        let err = connector.dial("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Connectivity(_)));
    }

    #[tokio::test]
    async fn dial_succeeds_against_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connector = SshConnector::new(CancellationToken::new()).unwrap();
        connector.dial("127.0.0.1", port).await.unwrap();
    }
}
