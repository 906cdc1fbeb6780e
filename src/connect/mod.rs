// src/connect/mod.rs

//! Connectivity to the guest: address resolution, session establishment and
//! the remote command channel.

pub mod manager;
pub mod retry;
pub mod script;
pub mod session;
pub mod ssh;

pub use manager::{ConnectionState, ConnectivityManager};
pub use retry::{DEFAULT_RETRY_DELAY, retry_until_cancelled};
pub use script::{exported_script, shell_quote};
pub use session::{CommandOutput, ConnectionSpec, Connector, RemoteSession, ResolverMode, SessionFuture};
pub use ssh::{ASKPASS_SECRET_ENV, SshConnector, askpass_reply};
