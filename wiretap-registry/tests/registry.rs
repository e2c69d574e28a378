use parking_lot::Mutex;
use std::sync::Arc;
use tracing_test::traced_test;
use wiretap_registry::{
    ConnectionStatus, DataSource, DataSourcePattern, FaultRegistry, RegistryDocument,
    RegistryPersister, SocketPattern,
};
use wiretap_store::SocketEndpoint;

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<RegistryDocument>>>);

impl RegistryPersister for Recorder {
    fn store(&self, document: &RegistryDocument) -> anyhow::Result<()> {
        self.0.lock().push(document.clone());
        Ok(())
    }
}

struct Failing;

impl RegistryPersister for Failing {
    fn store(&self, _document: &RegistryDocument) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
}

#[test]
fn resolving_unknown_endpoint_registers_it_open() {
    let registry = FaultRegistry::new();

    let status = registry.resolve_socket(&SocketEndpoint::new("db", 5432), None);

    assert_eq!(status, ConnectionStatus::Open);
    assert_eq!(
        registry.sockets(),
        vec![(SocketPattern::new("db", 5432), ConnectionStatus::Open)]
    );
}

#[test]
fn repeated_resolution_is_idempotent() {
    let registry = FaultRegistry::new();
    let endpoint = SocketEndpoint::new("db", 5432).connection(3);

    for _ in 0..3 {
        assert_eq!(registry.resolve_socket(&endpoint, None), ConnectionStatus::Open);
    }

    assert_eq!(registry.sockets().len(), 1);
}

#[test]
fn first_non_open_match_in_insertion_order_wins() {
    let registry = FaultRegistry::new();
    registry.set_socket_status(SocketPattern::new("db", 5432), ConnectionStatus::Open);
    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Delay(100));
    registry.set_socket_status(SocketPattern::any(), ConnectionStatus::Closed);

    assert_eq!(
        registry.resolve_socket(&SocketEndpoint::new("db", 5432), None),
        ConnectionStatus::Delay(100)
    );
    assert_eq!(
        registry.resolve_socket(&SocketEndpoint::new("cache", 6379), None),
        ConnectionStatus::Closed
    );
    assert_eq!(registry.sockets().len(), 3);
}

#[test]
fn upsert_keeps_original_position() {
    let registry = FaultRegistry::new();
    registry.set_socket_status(SocketPattern::any(), ConnectionStatus::Delay(10));
    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Closed);
    registry.set_socket_status(SocketPattern::any(), ConnectionStatus::Delay(20));

    assert_eq!(
        registry.resolve_socket(&SocketEndpoint::new("db", 5432), None),
        ConnectionStatus::Delay(20)
    );
}

#[test]
fn data_sources_resolve_and_register() {
    let registry = FaultRegistry::new();
    let data_source = DataSource::new("jdbc:h2:mem:", "sa");

    assert_eq!(registry.resolve_data_source(&data_source, None), ConnectionStatus::Open);

    registry.set_data_source_status(
        DataSourcePattern::new("jdbc:h2:mem:", "sa"),
        ConnectionStatus::Closed,
    );

    assert_eq!(registry.resolve_data_source(&data_source, None), ConnectionStatus::Closed);
    assert_eq!(registry.data_sources().len(), 1);
}

#[test]
fn scoped_table_takes_precedence_when_enabled() {
    let registry = FaultRegistry::new();
    let endpoint = SocketEndpoint::new("db", 5432);
    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Delay(5));

    let scope = registry.scope();
    scope.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Closed);

    assert_eq!(
        registry.resolve_socket(&endpoint, Some(&scope)),
        ConnectionStatus::Delay(5)
    );

    registry.set_thread_local(true);

    assert_eq!(
        registry.resolve_socket(&endpoint, Some(&scope)),
        ConnectionStatus::Closed
    );
    assert_eq!(registry.resolve_socket(&endpoint, None), ConnectionStatus::Delay(5));
}

#[test]
fn scoped_table_falls_through_to_global() {
    let registry = FaultRegistry::new();
    registry.set_thread_local(true);

    let scope = registry.scope();
    scope.set_socket_status(SocketPattern::host("cache"), ConnectionStatus::Closed);

    assert_eq!(
        registry.resolve_socket(&SocketEndpoint::new("db", 5432), Some(&scope)),
        ConnectionStatus::Open
    );
    assert!(scope.sockets().iter().all(|(pattern, _)| pattern.host.as_deref() == Some("cache")));
    assert_eq!(registry.sockets().len(), 1);
}

#[test]
fn concurrent_scopes_do_not_interfere() {
    let registry = Arc::new(FaultRegistry::new());
    registry.set_thread_local(true);

    let handles = [ConnectionStatus::Closed, ConnectionStatus::Delay(7)]
        .into_iter()
        .map(|status| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let scope = registry.scope();
                scope.set_socket_status(SocketPattern::new("db", 5432), status);

                registry.resolve_socket(&SocketEndpoint::new("db", 5432), Some(&scope))
            })
        })
        .collect::<Vec<_>>();

    let resolved = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();

    assert_eq!(resolved, vec![ConnectionStatus::Closed, ConnectionStatus::Delay(7)]);
}

#[test]
fn clear_empties_global_and_scopes() {
    let registry = FaultRegistry::new();
    registry.set_persistent(true);
    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Closed);

    let scope = registry.scope();
    scope.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Closed);

    registry.clear();

    assert!(registry.global().is_empty());
    assert!(scope.is_empty());
    assert!(!registry.is_persistent());
}

#[test]
fn mutations_persist_only_when_persistent() {
    let recorder = Recorder::default();
    let registry = FaultRegistry::with_persister(recorder.clone());

    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Closed);
    assert!(recorder.0.lock().is_empty());

    registry.set_persistent(true);
    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Delay(-20));
    registry.resolve_socket(&SocketEndpoint::new("cache", 6379), None);

    let documents = recorder.0.lock();
    assert_eq!(documents.len(), 2);
    assert!(documents[1].persistent);
    assert_eq!(documents[1].sockets.len(), 2);
    assert_eq!(documents[1].sockets[0].status, ConnectionStatus::Delay(-20));
}

#[test]
#[traced_test]
fn persistence_failure_is_logged_not_raised() {
    let registry = FaultRegistry::with_persister(Failing);
    registry.set_persistent(true);

    registry.set_socket_status(SocketPattern::host("db"), ConnectionStatus::Closed);

    assert_eq!(registry.sockets().len(), 1);
    assert!(logs_contain("failed to persist fault registry"));
}

#[test]
fn json_document_layout() {
    let registry = FaultRegistry::new();
    registry.set_socket_status(SocketPattern::new("db", 5432), ConnectionStatus::Delay(-50));
    registry.set_socket_status(SocketPattern::port(6379), ConnectionStatus::Closed);
    registry.set_data_source_status(
        DataSourcePattern::new("jdbc:h2:mem:", "sa"),
        ConnectionStatus::Open,
    );

    let mut buffer = Vec::new();
    registry.write_json(&mut buffer).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();

    assert_eq!(
        json,
        serde_json::json!({
            "persistent": false,
            "sockets": [
                { "host": "db", "port": 5432, "status": "-50" },
                { "port": 6379, "status": "CLOSED" },
            ],
            "dataSources": [
                { "url": "jdbc:h2:mem:", "userName": "sa", "status": "OPEN" },
            ],
        })
    );

    let restored = FaultRegistry::new();
    restored.read_json(buffer.as_slice()).unwrap();

    assert_eq!(restored.serialize(), registry.serialize());
}

#[test]
fn read_json_rejects_unknown_status() {
    let registry = FaultRegistry::new();
    let json = r#"{"sockets":[{"host":"db","port":1,"status":"BROKEN"}]}"#;

    assert!(registry.read_json(json.as_bytes()).is_err());
    assert!(registry.global().is_empty());
}

#[test]
fn read_json_accepts_ports_written_as_strings() {
    let registry = FaultRegistry::new();
    let json = r#"{"persistent":true,"sockets":[{"host":"db","port":"5432","status":"CLOSED"}]}"#;

    registry.read_json(json.as_bytes()).unwrap();

    assert_eq!(
        registry.sockets(),
        vec![(SocketPattern::new("db", 5432), ConnectionStatus::Closed)]
    );
    assert_eq!(
        registry.resolve_socket(&SocketEndpoint::new("db", 5432), None),
        ConnectionStatus::Closed
    );
}

#[test]
fn read_json_rejects_non_numeric_ports() {
    let registry = FaultRegistry::new();
    let json = r#"{"sockets":[{"host":"db","port":"db-port","status":"CLOSED"}]}"#;

    assert!(registry.read_json(json.as_bytes()).is_err());
    assert!(registry.global().is_empty());
}

#[test]
fn host_rules_match_the_resolved_address() {
    let registry = FaultRegistry::new();
    registry.set_socket_status(SocketPattern::host("10.0.0.7"), ConnectionStatus::Closed);

    let resolved = SocketEndpoint::new("db.internal", 5432).resolved("10.0.0.7");
    let unresolved = SocketEndpoint::new("db.internal", 5432);

    assert_eq!(registry.resolve_socket(&resolved, None), ConnectionStatus::Closed);
    assert_eq!(registry.resolve_socket(&unresolved, None), ConnectionStatus::Open);
}
