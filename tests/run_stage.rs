// tests/run_stage.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tart_executor::errors::ExecutorError;
use tart_executor::stages::{BUILD_EXIT_CODE_FILE_VAR, RunOptions, StageCommand, StageOutcome};
use tart_executor_test_utils::{
    FakeConnector, FakeEngine, JobEnvBuilder, init_tracing, orchestrator, unique_job_id, with_timeout,
};
use tokio_util::sync::CancellationToken;

fn write_script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("script.sh");
    std::fs::write(&path, body).unwrap();
    path
}

fn run_command(script: PathBuf) -> StageCommand {
    StageCommand::Run(RunOptions {
        script,
        stage: Some("build_script".into()),
    })
}

#[tokio::test]
async fn non_zero_script_status_is_a_build_failure() {
    init_tracing();
    let job_id = unique_job_id();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "exit 3\n");
    let exit_code_file = dir.path().join("exit-code");

    let engine = Arc::new(FakeEngine::new().with_vm(&format!("job-{job_id}")));
    let connector = Arc::new(FakeConnector::new().with_shell_status(3));
    let env = JobEnvBuilder::new(&job_id)
        .var(BUILD_EXIT_CODE_FILE_VAR, &exit_code_file.display().to_string())
        .var("BUILD_FAILURE_EXIT_CODE", "17")
        .var("SYSTEM_FAILURE_EXIT_CODE", "42")
        .build();
    let orch = orchestrator(env, engine, connector, CancellationToken::new());

    let outcome = with_timeout(orch.dispatch(&run_command(script))).await;

    assert!(matches!(outcome, StageOutcome::BuildFailure(3)), "got {outcome:?}");
    assert_eq!(outcome.exit_code(&orch.config().exit_codes), 17);
    assert_eq!(std::fs::read_to_string(&exit_code_file).unwrap(), "3\n");
}

#[tokio::test]
async fn successful_script_leaves_the_exit_code_file_alone() {
    init_tracing();
    let job_id = unique_job_id();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "echo ok\n");
    let exit_code_file = dir.path().join("exit-code");

    let engine = Arc::new(FakeEngine::new().with_vm(&format!("job-{job_id}")));
    let env = JobEnvBuilder::new(&job_id)
        .var(BUILD_EXIT_CODE_FILE_VAR, &exit_code_file.display().to_string())
        .build();
    let orch = orchestrator(env, engine, Arc::new(FakeConnector::new()), CancellationToken::new());

    let outcome = orch.dispatch(&run_command(script)).await;

    assert!(outcome.is_success());
    assert!(!exit_code_file.exists());
}

#[tokio::test]
async fn unwritable_exit_code_file_does_not_change_the_outcome() {
    init_tracing();
    let job_id = unique_job_id();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "exit 5\n");
    let exit_code_file = dir.path().join("missing-dir").join("exit-code");

    let engine = Arc::new(FakeEngine::new().with_vm(&format!("job-{job_id}")));
    let connector = Arc::new(FakeConnector::new().with_shell_status(5));
    let env = JobEnvBuilder::new(&job_id)
        .var(BUILD_EXIT_CODE_FILE_VAR, &exit_code_file.display().to_string())
        .build();
    let orch = orchestrator(env, engine, connector, CancellationToken::new());

    let outcome = orch.dispatch(&run_command(script)).await;
    assert!(matches!(outcome, StageOutcome::BuildFailure(5)));
}

#[tokio::test]
async fn script_runs_in_the_configured_shell_with_job_variables() {
    init_tracing();
    let job_id = unique_job_id();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "echo \"$GREETING\"\n");

    let engine = Arc::new(FakeEngine::new().with_vm(&format!("job-{job_id}")));
    let connector = Arc::new(FakeConnector::new());
    let env = JobEnvBuilder::new(&job_id)
        .driver("SHELL", "/bin/bash")
        .user_var("GREETING", "it's me")
        .user_var("NOT-AN-IDENTIFIER", "skipped")
        .var("HOST_ONLY", "never exported")
        .build();
    let orch = orchestrator(env, engine, connector.clone(), CancellationToken::new());

    orch.run(&RunOptions { script, stage: None }).await.unwrap();

    let shells = connector.shells();
    assert_eq!(shells.len(), 1);
    assert_eq!(shells[0].shell.as_deref(), Some("/bin/bash"));

    let stdin = shells[0].script();
    assert!(stdin.contains("export GREETING='it'\\''s me'\n"), "{stdin}");
    assert!(stdin.contains(&format!("export CI_JOB_ID='{job_id}'\n")), "{stdin}");
    assert!(!stdin.contains("NOT-AN-IDENTIFIER"));
    assert!(!stdin.contains("HOST_ONLY"));
    assert!(stdin.ends_with("echo \"$GREETING\"\n"));
}

#[tokio::test]
async fn non_utf8_script_is_piped_byte_for_byte() {
    init_tracing();
    let job_id = unique_job_id();
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("script.sh");
    std::fs::write(&script, b"echo caf\xe9\n").unwrap();

    let engine = Arc::new(FakeEngine::new().with_vm(&format!("job-{job_id}")));
    let connector = Arc::new(FakeConnector::new());
    let env = JobEnvBuilder::new(&job_id).build();
    let orch = orchestrator(env, engine, connector.clone(), CancellationToken::new());

    let outcome = orch.dispatch(&run_command(script)).await;

    assert!(outcome.is_success(), "got {outcome:?}");
    let shells = connector.shells();
    assert_eq!(shells.len(), 1);
    assert!(shells[0].stdin.ends_with(b"echo caf\xe9\n"));
}

#[tokio::test]
async fn missing_script_file_is_a_system_failure() {
    init_tracing();
    let job_id = unique_job_id();
    let connector = Arc::new(FakeConnector::new());
    let env = JobEnvBuilder::new(&job_id).build();
    let orch = orchestrator(env, Arc::new(FakeEngine::new()), connector.clone(), CancellationToken::new());

    let outcome = orch
        .dispatch(&run_command(PathBuf::from("/nonexistent/script.sh")))
        .await;

    assert!(matches!(outcome, StageOutcome::SystemFailure(ExecutorError::Io(_))));
    assert_eq!(connector.dial_attempts(), 0);
}

#[tokio::test]
async fn cancellation_while_waiting_for_the_vm_is_never_a_build_failure() {
    init_tracing();
    let job_id = unique_job_id();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "exit 3\n");
    let exit_code_file = dir.path().join("exit-code");

    // The VM never comes up: every address lookup fails.
    let engine = Arc::new(FakeEngine::new());
    let connector = Arc::new(FakeConnector::new().with_shell_status(3));
    let env = JobEnvBuilder::new(&job_id)
        .var(BUILD_EXIT_CODE_FILE_VAR, &exit_code_file.display().to_string())
        .build();
    let cancel = CancellationToken::new();
    let orch = orchestrator(env, engine.clone(), connector.clone(), cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let outcome = with_timeout(orch.dispatch(&run_command(script))).await;
    canceller.await.unwrap();

    assert!(
        matches!(outcome, StageOutcome::SystemFailure(ExecutorError::Connectivity(_))),
        "got {outcome:?}"
    );
    assert!(engine.calls_to("ip").len() > 1);
    assert!(connector.shells().is_empty());
    assert!(!exit_code_file.exists());
}

/// Stand-in for the OpenSSH client: runs the remote command locally.
#[cfg(unix)]
fn write_local_ssh(dir: &tempfile::TempDir) -> PathBuf {
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.path().join("ssh");
    std::fs::write(
        &path,
        "#!/bin/sh\n\
         while [ \"$#\" -gt 0 ]; do\n\
         \x20 if [ \"$1\" = \"--\" ]; then shift; exec sh -c \"$1\"; fi\n\
         \x20 shift\n\
         done\n\
         exec sh\n",
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
async fn run_over_local_ssh(body: &str) -> (StageOutcome, PathBuf, tempfile::TempDir) {
    use tart_executor::config::ExecutorConfig;
    use tart_executor::connect::SshConnector;
    use tart_executor::stages::Orchestrator;

    let job_id = unique_job_id();
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, body);
    let exit_code_file = dir.path().join("exit-code");
    let ssh = write_local_ssh(&dir);

    // Only the reachability dial touches the port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let env = JobEnvBuilder::new(&job_id)
        .driver("SSH_PORT", &port.to_string())
        .driver("SHELL", "sh")
        .var(BUILD_EXIT_CODE_FILE_VAR, &exit_code_file.display().to_string())
        .build();
    let config = ExecutorConfig::from_environment(&env).unwrap();
    let engine = Arc::new(FakeEngine::new().with_vm(&format!("job-{job_id}")).with_ip("127.0.0.1"));
    let cancel = CancellationToken::new();
    let connector = Arc::new(SshConnector::new(cancel.clone()).unwrap().with_ssh_binary(ssh));
    let orch = Orchestrator::new(config, env, engine, connector, cancel)
        .with_retry_delay(Duration::from_millis(1))
        .without_output_relay();

    let outcome = with_timeout(orch.dispatch(&run_command(script))).await;
    drop(listener);
    (outcome, exit_code_file, dir)
}

#[cfg(unix)]
#[tokio::test]
async fn script_exiting_255_is_a_build_failure_not_a_connectivity_error() {
    init_tracing();

    let (outcome, exit_code_file, _dir) = run_over_local_ssh("echo before\nexit 255\n").await;

    assert!(matches!(outcome, StageOutcome::BuildFailure(255)), "got {outcome:?}");
    assert_eq!(std::fs::read_to_string(&exit_code_file).unwrap(), "255\n");
}

#[cfg(unix)]
#[tokio::test]
async fn guest_status_survives_the_ssh_client() {
    init_tracing();

    let (outcome, exit_code_file, _dir) = run_over_local_ssh("echo oops >&2\nexit 7\n").await;
    assert!(matches!(outcome, StageOutcome::BuildFailure(7)), "got {outcome:?}");
    assert_eq!(std::fs::read_to_string(&exit_code_file).unwrap(), "7\n");

    let (outcome, exit_code_file, _dir) = run_over_local_ssh("true\n").await;
    assert!(outcome.is_success(), "got {outcome:?}");
    assert!(!exit_code_file.exists());
}
