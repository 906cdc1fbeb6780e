// src/connect/session.rs

//! The seam between the connectivity manager and the remote-shell transport.

use std::future::Future;
use std::pin::Pin;

use crate::config::DriverConfig;
use crate::errors::Result;

pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// How the guest's address is discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverMode {
    Dhcp,
    Arp,
}

impl ResolverMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolverMode::Dhcp => "dhcp",
            ResolverMode::Arp => "arp",
        }
    }
}

/// Everything needed to reach the guest's remote shell.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub port: u16,
    pub username: String,
    pub password: String,
    pub resolver: ResolverMode,
    pub shell: Option<String>,
}

impl ConnectionSpec {
    pub fn from_config(config: &DriverConfig) -> Self {
        Self {
            port: config.ssh_port,
            username: config.ssh_username.clone(),
            password: config.ssh_password.clone(),
            resolver: if config.network.is_bridged() {
                ResolverMode::Arp
            } else {
                ResolverMode::Dhcp
            },
            shell: config.shell.clone(),
        }
    }
}

impl std::fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("resolver", &self.resolver)
            .field("shell", &self.shell)
            .finish()
    }
}

/// Result of a command run to completion in the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Opens sessions to a guest.
pub trait Connector: Send + Sync {
    /// Check that something accepts TCP connections on `address:port`.
    fn dial<'a>(&'a self, address: &'a str, port: u16) -> SessionFuture<'a, ()>;

    /// Authenticate and return a usable session.
    fn handshake<'a>(
        &'a self,
        address: &'a str,
        spec: &'a ConnectionSpec,
    ) -> SessionFuture<'a, Box<dyn RemoteSession>>;
}

/// An authenticated remote command channel.
///
/// A non-zero status is returned as a value, not an error; errors mean the
/// channel itself failed.
pub trait RemoteSession: Send + Sync {
    /// Run `command` to completion, capturing its output.
    fn run<'a>(&'a self, command: &'a str) -> SessionFuture<'a, CommandOutput>;

    /// Start the login shell (or `shell`, if given), feed it `stdin` and
    /// stream its output to ours. Resolves to the guest's exit status.
    fn shell<'a>(&'a self, shell: Option<&'a str>, stdin: Vec<u8>) -> SessionFuture<'a, i32>;
}
