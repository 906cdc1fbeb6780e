// tests/vm_lifecycle.rs

use std::time::Duration;

use tart_executor::config::DriverConfig;
use tart_executor::errors::{EngineError, ExecutorError};
use tart_executor::relay;
use tart_executor::vm::{GuestOs, PullOptions, VmIdentity, VmRunSpec, VmSupervisor};
use tart_executor_test_utils::{FakeEngine, init_tracing, unique_job_id, with_timeout};
use tokio::io::AsyncReadExt as _;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn create_stops_at_the_first_failing_set() {
    init_tracing();
    let engine = FakeEngine::new();
    engine.fail_next("set", 1, "invalid CPU count");
    let cancel = CancellationToken::new();
    let supervisor = VmSupervisor::new(&engine, &cancel);
    let identity = VmIdentity::for_job("11");

    let spec = VmRunSpec::from_config("org/image:latest", &DriverConfig::default()).with_cpu(Some(64));
    let err = supervisor
        .create(&identity, &spec, &PullOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Engine(EngineError::CommandFailed { .. })));
    assert_eq!(engine.subcommands(), vec!["clone", "set"]);
    // Not rolled back: cleanup deletes it.
    assert!(engine.has_vm(identity.as_str()));
}

#[tokio::test]
async fn clone_carries_transport_options() {
    init_tracing();
    let engine = FakeEngine::new();
    let cancel = CancellationToken::new();
    let supervisor = VmSupervisor::new(&engine, &cancel);
    let identity = VmIdentity::for_job("12");

    let options = PullOptions {
        insecure: true,
        concurrency: Some(8),
        ..PullOptions::default()
    };
    let spec = VmRunSpec::from_config("registry.local/macos:sonoma", &DriverConfig::default());
    supervisor.create(&identity, &spec, &options).await.unwrap();

    assert_eq!(
        engine.calls_to("clone")[0].args,
        vec![
            "clone",
            "registry.local/macos:sonoma",
            identity.as_str(),
            "--insecure",
            "--concurrency",
            "8"
        ]
    );
}

#[tokio::test]
async fn info_reports_the_guest_os() {
    init_tracing();
    let identity = VmIdentity::for_job("13");
    let engine = FakeEngine::new().with_vm(identity.as_str()).with_guest_os("linux");
    let cancel = CancellationToken::new();
    let supervisor = VmSupervisor::new(&engine, &cancel);

    let info = supervisor.info(&identity).await.unwrap();
    assert_eq!(info.os, GuestOs::Linux);
    assert_eq!(
        engine.calls_to("get")[0].args,
        vec!["get", "--format", "json", identity.as_str()]
    );
}

#[tokio::test]
async fn unparsable_info_is_invalid_output() {
    init_tracing();
    let identity = VmIdentity::for_job("14");
    let engine = FakeEngine::new().with_vm(identity.as_str());
    engine.respond_next("get", "not json");
    let cancel = CancellationToken::new();
    let supervisor = VmSupervisor::new(&engine, &cancel);

    let err = supervisor.info(&identity).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Engine(EngineError::InvalidOutput { .. })), "got {err:?}");
}

#[tokio::test]
async fn stop_failure_is_tolerated_but_delete_failure_is_not() {
    init_tracing();
    let engine = FakeEngine::new();
    let cancel = CancellationToken::new();
    let supervisor = VmSupervisor::new(&engine, &cancel);
    let identity = VmIdentity::for_job("15");

    assert!(!supervisor.stop(&identity).await);
    let err = supervisor.delete(&identity).await.unwrap_err();

    match err {
        ExecutorError::VmDeleteFailed { identity: name, source } => {
            assert_eq!(name, identity.as_str());
            assert!(source.to_string().contains("does not exist"));
        }
        other => panic!("expected VmDeleteFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn launched_vm_output_reaches_the_relay() {
    init_tracing();
    let identity = VmIdentity::for_job(&unique_job_id());
    let engine = FakeEngine::new().with_vm(identity.as_str());
    let cancel = CancellationToken::new();
    let supervisor = VmSupervisor::new(&engine, &cancel);

    let spec = VmRunSpec::from_config("org/image:latest", &DriverConfig::default());
    let handle = supervisor.launch(&identity, &spec).unwrap();
    assert_eq!(handle.log_path, identity.log_path());

    let (writer, mut reader) = tokio::io::duplex(1024);
    let path = handle.log_path.clone();
    let task = tokio::spawn(async move { relay::relay_file(&path, writer).await });

    let expected = format!("fake VM {identity} booted");
    let mut seen = String::new();
    with_timeout(async {
        let mut buf = [0u8; 256];
        while !seen.contains(&expected) {
            let n = reader.read(&mut buf).await.unwrap();
            assert!(n > 0);
            seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    })
    .await;

    task.abort();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let _ = std::fs::remove_file(identity.log_path());
}

#[tokio::test]
async fn launch_hands_spec_environment_to_the_engine() {
    init_tracing();
    let identity = VmIdentity::for_job(&unique_job_id());
    let engine = FakeEngine::new().with_vm(identity.as_str());
    let cancel = CancellationToken::new();
    let supervisor = VmSupervisor::new(&engine, &cancel);

    let mut spec = VmRunSpec::from_config("org/image:latest", &DriverConfig::default());
    spec.env.insert("TART_NO_AUTO_PRUNE".to_string(), "1".to_string());
    supervisor.launch(&identity, &spec).unwrap();

    let launches = engine.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].args.last().map(String::as_str), Some(identity.as_str()));
    assert_eq!(launches[0].env.get("TART_NO_AUTO_PRUNE").map(String::as_str), Some("1"));

    let _ = std::fs::remove_file(identity.log_path());
}
