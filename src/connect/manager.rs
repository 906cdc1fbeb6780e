// src/connect/manager.rs

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::env::EnvOverrides;
use crate::errors::Result;
use crate::exec::Engine;
use crate::vm::VmIdentity;

use super::retry::{DEFAULT_RETRY_DELAY, retry_until_cancelled};
use super::session::{ConnectionSpec, Connector, RemoteSession, ResolverMode};

/// Seconds the engine itself waits for an address before giving up on one
/// resolution attempt.
pub const IP_WAIT_SECS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unresolved,
    AddressKnown(String),
    Connected(String),
    SessionOpen(String),
    Closed,
}

/// Waits for a booting guest and hands out a remote session to it.
///
/// Every wait is unbounded and only ends on success or cancellation, since
/// guest boot time has no useful upper bound.
pub struct ConnectivityManager<'a> {
    engine: &'a dyn Engine,
    connector: &'a dyn Connector,
    cancel: &'a CancellationToken,
    retry_delay: Duration,
    state: ConnectionState,
}

impl<'a> ConnectivityManager<'a> {
    pub fn new(engine: &'a dyn Engine, connector: &'a dyn Connector, cancel: &'a CancellationToken) -> Self {
        Self {
            engine,
            connector,
            cancel,
            retry_delay: DEFAULT_RETRY_DELAY,
            state: ConnectionState::Unresolved,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(from = ?self.state, to = ?next, "connectivity state change");
        self.state = next;
    }

    /// Ask the engine for the guest's address until it has one.
    pub async fn resolve_address(&mut self, identity: &VmIdentity, resolver: ResolverMode) -> Result<String> {
        let args = vec![
            "ip".to_string(),
            "--wait".to_string(),
            IP_WAIT_SECS.to_string(),
            "--resolver".to_string(),
            resolver.as_str().to_string(),
            identity.to_string(),
        ];
        let env = EnvOverrides::new();

        let engine = self.engine;
        let cancel = self.cancel;
        let (args, env) = (&args, &env);

        let what = format!("retrieving IP address of VM {identity}");
        let output = retry_until_cancelled(&what, self.retry_delay, cancel, move |_| {
            engine.execute(args, env, cancel)
        })
        .await?;

        let address = output.stdout.trim().to_string();
        info!(vm = %identity, %address, "VM address resolved");
        self.transition(ConnectionState::AddressKnown(address.clone()));
        Ok(address)
    }

    /// Wait for the guest's remote shell daemon and authenticate to it.
    pub async fn establish(&mut self, address: &str, spec: &ConnectionSpec) -> Result<Box<dyn RemoteSession>> {
        let connector = self.connector;
        let port = spec.port;

        let what = format!("connecting to {address}:{port}");
        retry_until_cancelled(&what, self.retry_delay, self.cancel, move |_| connector.dial(address, port)).await?;
        self.transition(ConnectionState::Connected(address.to_string()));

        let what = format!("opening a session to {address}:{port}");
        let session =
            retry_until_cancelled(&what, self.retry_delay, self.cancel, move |_| connector.handshake(address, spec))
                .await?;
        self.transition(ConnectionState::SessionOpen(address.to_string()));

        Ok(session)
    }

    /// Resolve the address of `identity` and open a session to it.
    pub async fn open_session(&mut self, identity: &VmIdentity, spec: &ConnectionSpec) -> Result<Box<dyn RemoteSession>> {
        let address = self.resolve_address(identity, spec.resolver).await?;
        self.establish(&address, spec).await
    }

    pub fn close(&mut self, session: Box<dyn RemoteSession>) {
        drop(session);
        self.transition(ConnectionState::Closed);
    }
}
