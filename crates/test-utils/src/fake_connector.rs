use std::sync::{Arc, Mutex};

use tart_executor::connect::{CommandOutput, ConnectionSpec, Connector, RemoteSession, SessionFuture};
use tart_executor::errors::ExecutorError;

/// A recorded interactive-shell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCall {
    pub shell: Option<String>,
    pub stdin: Vec<u8>,
}

impl ShellCall {
    /// The piped script as text, for assertions.
    pub fn script(&self) -> String {
        String::from_utf8_lossy(&self.stdin).into_owned()
    }
}

#[derive(Default)]
struct State {
    dial_failures: u32,
    handshake_failures: u32,
    dials: u32,
    handshakes: u32,
    addresses: Vec<String>,
    shell_status: i32,
    run_statuses: Vec<(String, i32)>,
    commands: Vec<String>,
    shells: Vec<ShellCall>,
}

/// A connector whose sessions never touch the network.
///
/// Dial and handshake can be told to fail a number of times first; sessions
/// record every command and shell script and answer with scripted statuses.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<State>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_dials(self, times: u32) -> Self {
        self.state.lock().unwrap().dial_failures = times;
        self
    }

    pub fn failing_handshakes(self, times: u32) -> Self {
        self.state.lock().unwrap().handshake_failures = times;
        self
    }

    /// Exit status every interactive shell reports.
    pub fn with_shell_status(self, status: i32) -> Self {
        self.state.lock().unwrap().shell_status = status;
        self
    }

    /// Exit status for run-to-completion commands containing `pattern`.
    pub fn with_run_status(self, pattern: &str, status: i32) -> Self {
        self.state
            .lock()
            .unwrap()
            .run_statuses
            .push((pattern.to_string(), status));
        self
    }

    pub fn dial_attempts(&self) -> u32 {
        self.state.lock().unwrap().dials
    }

    pub fn handshake_attempts(&self) -> u32 {
        self.state.lock().unwrap().handshakes
    }

    pub fn addresses(&self) -> Vec<String> {
        self.state.lock().unwrap().addresses.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn shells(&self) -> Vec<ShellCall> {
        self.state.lock().unwrap().shells.clone()
    }
}

impl Connector for FakeConnector {
    fn dial<'a>(&'a self, address: &'a str, port: u16) -> SessionFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.dials += 1;
            state.addresses.push(format!("{address}:{port}"));
            if state.dial_failures > 0 {
                state.dial_failures -= 1;
                return Err(ExecutorError::Connectivity(format!(
                    "dialing {address}:{port}: connection refused"
                )));
            }
            Ok(())
        })
    }

    fn handshake<'a>(
        &'a self,
        _address: &'a str,
        _spec: &'a ConnectionSpec,
    ) -> SessionFuture<'a, Box<dyn RemoteSession>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.handshakes += 1;
            if state.handshake_failures > 0 {
                state.handshake_failures -= 1;
                return Err(ExecutorError::Connectivity(
                    "ssh client failed with status 255".to_string(),
                ));
            }
            Ok(Box::new(FakeSession {
                state: Arc::clone(&self.state),
            }) as Box<dyn RemoteSession>)
        })
    }
}

struct FakeSession {
    state: Arc<Mutex<State>>,
}

impl RemoteSession for FakeSession {
    fn run<'a>(&'a self, command: &'a str) -> SessionFuture<'a, CommandOutput> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.commands.push(command.to_string());
            let status = state
                .run_statuses
                .iter()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
                .map_or(0, |(_, status)| *status);
            Ok(CommandOutput {
                status,
                stdout: String::new(),
                stderr: if status == 0 {
                    String::new()
                } else {
                    "command failed\n".to_string()
                },
            })
        })
    }

    fn shell<'a>(&'a self, shell: Option<&'a str>, stdin: Vec<u8>) -> SessionFuture<'a, i32> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.shells.push(ShellCall {
                shell: shell.map(str::to_string),
                stdin,
            });
            Ok(state.shell_status)
        })
    }
}
