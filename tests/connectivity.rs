// tests/connectivity.rs

use std::time::Duration;

use tart_executor::config::DriverConfig;
use tart_executor::connect::{ConnectionSpec, ConnectionState, ConnectivityManager, ResolverMode};
use tart_executor::errors::ExecutorError;
use tart_executor::vm::VmIdentity;
use tart_executor_test_utils::{FakeConnector, FakeEngine, init_tracing, with_timeout};
use tokio_util::sync::CancellationToken;

const FAST: Duration = Duration::from_millis(1);

fn spec() -> ConnectionSpec {
    ConnectionSpec::from_config(&DriverConfig::default())
}

#[tokio::test]
async fn state_moves_from_unresolved_to_closed() {
    init_tracing();
    let identity = VmIdentity::for_job("7");
    let engine = FakeEngine::new().with_vm(identity.as_str());
    let connector = FakeConnector::new();
    let cancel = CancellationToken::new();
    let mut manager = ConnectivityManager::new(&engine, &connector, &cancel).with_retry_delay(FAST);

    assert_eq!(manager.state(), &ConnectionState::Unresolved);

    let address = manager.resolve_address(&identity, ResolverMode::Dhcp).await.unwrap();
    assert_eq!(address, "192.168.64.2");
    assert_eq!(manager.state(), &ConnectionState::AddressKnown(address.clone()));

    let session = manager.establish(&address, &spec()).await.unwrap();
    assert_eq!(manager.state(), &ConnectionState::SessionOpen(address.clone()));

    manager.close(session);
    assert_eq!(manager.state(), &ConnectionState::Closed);
}

#[tokio::test]
async fn address_lookup_is_retried_until_it_succeeds() {
    init_tracing();
    let identity = VmIdentity::for_job("8");
    let engine = FakeEngine::new().with_vm(identity.as_str());
    engine.fail_next("ip", 5, "no IP address found, is your VM running?");
    let connector = FakeConnector::new();
    let cancel = CancellationToken::new();
    let mut manager = ConnectivityManager::new(&engine, &connector, &cancel).with_retry_delay(FAST);

    let address = with_timeout(manager.resolve_address(&identity, ResolverMode::Arp))
        .await
        .unwrap();

    assert_eq!(address, "192.168.64.2");
    let calls = engine.calls_to("ip");
    assert_eq!(calls.len(), 6);
    assert_eq!(
        calls[0].args,
        vec!["ip", "--wait", "60", "--resolver", "arp", identity.as_str()]
    );
}

#[tokio::test]
async fn dial_and_handshake_are_retried_separately() {
    init_tracing();
    let engine = FakeEngine::new();
    let connector = FakeConnector::new().failing_dials(3).failing_handshakes(2);
    let cancel = CancellationToken::new();
    let mut manager = ConnectivityManager::new(&engine, &connector, &cancel).with_retry_delay(FAST);

    let spec = ConnectionSpec {
        port: 2222,
        ..spec()
    };
    with_timeout(manager.establish("10.0.0.5", &spec)).await.unwrap();

    assert_eq!(connector.dial_attempts(), 4);
    assert_eq!(connector.handshake_attempts(), 3);
    assert!(connector.addresses().iter().all(|a| a == "10.0.0.5:2222"));
}

#[tokio::test]
async fn cancellation_ends_an_unbounded_wait() {
    init_tracing();
    // No VM: every lookup fails, forever.
    let identity = VmIdentity::for_job("9");
    let engine = FakeEngine::new();
    let connector = FakeConnector::new();
    let cancel = CancellationToken::new();
    let mut manager = ConnectivityManager::new(&engine, &connector, &cancel).with_retry_delay(FAST);

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let err = match with_timeout(manager.open_session(&identity, &spec())).await {
        Ok(_) => panic!("session opened to a VM that does not exist"),
        Err(e) => e,
    };

    match &err {
        ExecutorError::Connectivity(msg) => {
            assert!(msg.contains("cancelled"), "{msg}");
            assert!(msg.contains("does not exist"), "last error missing: {msg}");
        }
        other => panic!("expected a connectivity error, got {other:?}"),
    }
    assert!(!err.is_build_failure());
    assert_eq!(manager.state(), &ConnectionState::Unresolved);
    assert_eq!(connector.dial_attempts(), 0);
}

#[tokio::test]
async fn cancelled_token_prevents_any_attempt() {
    init_tracing();
    let engine = FakeEngine::new();
    let connector = FakeConnector::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut manager = ConnectivityManager::new(&engine, &connector, &cancel).with_retry_delay(FAST);

    let result = manager.establish("10.0.0.5", &spec()).await;

    assert!(matches!(result, Err(ExecutorError::Connectivity(_))));
    assert_eq!(connector.dial_attempts(), 0);
}
