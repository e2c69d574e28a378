use std::{
    io,
    time::{Duration, Instant},
};
use wiretap_registry::{
    CancellationToken, ConnectionStatus, DataSource, DataSourcePattern, FaultDecision,
    FaultRegistry, SocketPattern,
};
use wiretap_store::SocketEndpoint;

#[tokio::test]
async fn open_endpoint_proceeds_immediately() {
    let registry = FaultRegistry::new();
    let cancel = CancellationToken::new();

    let decision = registry
        .on_connect_attempt(&SocketEndpoint::new("db", 5432), None, &cancel)
        .await
        .unwrap();

    assert_eq!(decision, FaultDecision::Proceed);
    assert!(decision.into_io().is_ok());
}

#[tokio::test]
async fn positive_delay_sleeps_then_proceeds() {
    let registry = FaultRegistry::new();
    registry.set_socket_status(SocketPattern::new("db", 5432), ConnectionStatus::Delay(30));

    let started = Instant::now();
    let decision = registry
        .on_connect_attempt(&SocketEndpoint::new("db", 5432), None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(decision, FaultDecision::Delayed(Duration::from_millis(30)));
    assert!(decision.proceeds());
}

#[tokio::test]
async fn negative_delay_sleeps_then_refuses() {
    let registry = FaultRegistry::new();
    registry.set_socket_status(SocketPattern::new("db", 5432), ConnectionStatus::Delay(-50));

    let started = Instant::now();
    let decision = registry
        .on_connect_attempt(&SocketEndpoint::new("db", 5432), None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(!decision.proceeds());

    let error = decision.into_io().unwrap_err();
    assert_eq!(error.kind(), io::ErrorKind::ConnectionRefused);
}

#[tokio::test]
async fn closed_endpoint_refuses_without_waiting() {
    let registry = FaultRegistry::new();
    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Closed);

    let started = Instant::now();
    let decision = registry
        .on_connect_attempt(&SocketEndpoint::new("db", 5432), None, &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(500));

    match decision {
        FaultDecision::Refused(fault) => {
            assert_eq!(fault.target, "db:5432");
            assert_eq!(fault.status, ConnectionStatus::Closed);
        }
        other => panic!("unexpected decision {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_interrupts_delay_as_timeout() {
    let registry = FaultRegistry::new();
    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Delay(10_000));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let error = registry
        .on_connect_attempt(&SocketEndpoint::new("db", 5432), None, &cancel)
        .await
        .unwrap_err();

    assert_eq!(error.kind(), io::ErrorKind::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn dropping_the_attempt_abandons_the_delay() {
    let registry = FaultRegistry::new();
    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Delay(10_000));

    let endpoint = SocketEndpoint::new("db", 5432);
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let attempt = tokio::time::timeout(
        Duration::from_millis(20),
        registry.on_connect_attempt(&endpoint, None, &cancel),
    )
    .await;

    assert!(attempt.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!cancel.is_cancelled());

    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Open);

    let decision = registry
        .on_connect_attempt(&endpoint, None, &cancel)
        .await
        .unwrap();

    assert_eq!(decision, FaultDecision::Proceed);
}

#[tokio::test]
async fn data_source_attempt_uses_data_source_rules() {
    let registry = FaultRegistry::new();
    registry.set_data_source_status(
        DataSourcePattern::url("jdbc:h2:mem:"),
        ConnectionStatus::Delay(-5),
    );

    let decision = registry
        .on_data_source_attempt(
            &DataSource::new("jdbc:h2:mem:", "sa"),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(matches!(decision, FaultDecision::Refused(_)));
}
