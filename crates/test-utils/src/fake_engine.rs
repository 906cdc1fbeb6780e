use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;

use tart_executor::env::EnvOverrides;
use tart_executor::errors::{EngineError, EngineOutputDump};
use tart_executor::exec::{Engine, EngineFuture, EngineOutput};
use tokio_util::sync::CancellationToken;

/// One recorded engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
    pub args: Vec<String>,
    pub env: EnvOverrides,
}

impl EngineCall {
    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

enum Scripted {
    Stdout(String),
    Fail(String),
}

struct State {
    calls: Vec<EngineCall>,
    launches: Vec<EngineCall>,
    scripted: HashMap<String, VecDeque<Scripted>>,
    vms: BTreeSet<String>,
    ip: String,
    guest_os: String,
}

/// An in-memory engine that:
/// - records every call (arguments and environment overrides)
/// - keeps track of which VMs exist, so `stop`/`delete` of a missing VM fail
///   like the real tool does
/// - lets tests script per-subcommand failures or outputs.
pub struct FakeEngine {
    state: Mutex<State>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                calls: Vec::new(),
                launches: Vec::new(),
                scripted: HashMap::new(),
                vms: BTreeSet::new(),
                ip: "192.168.64.2".to_string(),
                guest_os: "darwin".to_string(),
            }),
        }
    }

    /// Pretend `name` already exists (as if `prepare` ran earlier).
    pub fn with_vm(self, name: &str) -> Self {
        self.state.lock().unwrap().vms.insert(name.to_string());
        self
    }

    /// Address `ip` reports for every existing VM.
    pub fn with_ip(self, ip: &str) -> Self {
        self.state.lock().unwrap().ip = ip.to_string();
        self
    }

    pub fn with_guest_os(self, os: &str) -> Self {
        self.state.lock().unwrap().guest_os = os.to_string();
        self
    }

    /// Make the next `times` calls of `subcommand` fail with `message`.
    pub fn fail_next(&self, subcommand: &str, times: usize, message: &str) {
        let mut state = self.state.lock().unwrap();
        let queue = state.scripted.entry(subcommand.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(Scripted::Fail(message.to_string()));
        }
    }

    /// Make the next call of `subcommand` succeed with `stdout`.
    pub fn respond_next(&self, subcommand: &str, stdout: &str) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(subcommand.to_string())
            .or_default()
            .push_back(Scripted::Stdout(stdout.to_string()));
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.subcommand().to_string()).collect()
    }

    pub fn calls_to(&self, subcommand: &str) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.subcommand() == subcommand)
            .collect()
    }

    pub fn launches(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().launches.clone()
    }

    pub fn has_vm(&self, name: &str) -> bool {
        self.state.lock().unwrap().vms.contains(name)
    }

    fn respond(&self, args: &[String], env: &EnvOverrides) -> Result<EngineOutput, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall {
            args: args.to_vec(),
            env: env.clone(),
        });

        let subcommand = args.first().cloned().unwrap_or_default();
        if let Some(scripted) = state.scripted.get_mut(&subcommand).and_then(VecDeque::pop_front) {
            return match scripted {
                Scripted::Stdout(stdout) => Ok(EngineOutput::stdout(stdout)),
                Scripted::Fail(message) => Err(failure(&message)),
            };
        }

        let vm = args.last().cloned().unwrap_or_default();
        let missing = || failure(&format!("the specified VM \"{vm}\" does not exist"));

        match subcommand.as_str() {
            "clone" => {
                let name = args.get(2).cloned().unwrap_or_default();
                state.vms.insert(name);
                Ok(EngineOutput::default())
            }
            "delete" => {
                if state.vms.remove(&vm) {
                    Ok(EngineOutput::default())
                } else {
                    Err(missing())
                }
            }
            "set" | "stop" | "ip" | "get" if !state.vms.contains(&vm) => Err(missing()),
            "ip" => Ok(EngineOutput::stdout(format!("{}\n", state.ip))),
            "get" => Ok(EngineOutput::stdout(format!(
                "{{\"os\":\"{}\",\"cpu\":4,\"memory\":8192}}",
                state.guest_os
            ))),
            _ => Ok(EngineOutput::default()),
        }
    }
}

fn failure(message: &str) -> EngineError {
    EngineError::CommandFailed {
        summary: message.to_string(),
        code: Some(1),
        output: EngineOutputDump {
            stdout: String::new(),
            stderr: format!("{message}\n"),
        },
    }
}

impl Engine for FakeEngine {
    fn execute<'a>(
        &'a self,
        args: &'a [String],
        env: &'a EnvOverrides,
        cancel: &'a CancellationToken,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled {
                    command: args.join(" "),
                });
            }
            self.respond(args, env)
        })
    }

    fn launch_detached(
        &self,
        args: &[String],
        env: &EnvOverrides,
        log_path: &Path,
    ) -> Result<(), EngineError> {
        let vm = args.last().cloned().unwrap_or_default();
        {
            let mut state = self.state.lock().unwrap();
            state.launches.push(EngineCall {
                args: args.to_vec(),
                env: env.clone(),
            });
            if !state.vms.contains(&vm) {
                return Err(failure(&format!("the specified VM \"{vm}\" does not exist")));
            }
        }

        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|source| EngineError::Exec {
                binary: "fake-engine".to_string(),
                source,
            })?;
        writeln!(log, "fake VM {vm} booted").map_err(|source| EngineError::Exec {
            binary: "fake-engine".to_string(),
            source,
        })?;

        Ok(())
    }
}
