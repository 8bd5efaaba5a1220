use enrichd::enrich::{Handler, HandlerConfig, RegistryRecord, REGISTRY_PREFIX};
use enrichd::error::EnrichdError;
use enrichd::events::{Event, EventKind};
use enrichd::store::{KvStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;

fn record(host: &str, addrs: &[&str], aliases: &[&str]) -> RegistryRecord {
    RegistryRecord {
        host: host.to_string(),
        domain: "corp.example".to_string(),
        addrs: addrs.iter().map(|a| a.parse().unwrap()).collect(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        team: None,
        os: Some("linux".to_string()),
    }
}

#[test]
fn test_registry_scenario_web01() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::new(&temp_dir.path().join("kv.db")).unwrap());
    let handler = Handler::new(HandlerConfig { store: Some(store) }).unwrap();

    handler
        .add_asset(record("web01", &["10.0.0.1"], &[]))
        .unwrap();

    // asset.host = "web01" resolves to the registry projection
    let mut event = handler
        .decode(
            br#"{"host": "web01", "program": "sshd", "message": "session opened"}"#,
            EventKind::Syslog,
        )
        .unwrap();
    handler.enrich(&mut event).unwrap();
    let enriched = &event.assets().unwrap().asset;
    assert_eq!(enriched.host, "web01");
    assert_eq!(enriched.ip, Some("10.0.0.1".parse().unwrap()));
    assert_eq!(enriched.domain.as_deref(), Some("corp.example"));
    assert!(handler.missing_keys().is_empty());

    // asset.host = "web02" stays a stub and lands in the missing set
    let mut event = handler
        .decode(br#"{"host": "web02", "program": "sshd"}"#, EventKind::Syslog)
        .unwrap();
    handler.enrich(&mut event).unwrap();
    let stub = &event.assets().unwrap().asset;
    assert_eq!(stub.host, "web02");
    assert!(stub.domain.is_none());
    assert_eq!(handler.missing_keys(), vec!["web02".to_string()]);
}

#[test]
fn test_handler_restart_sees_persisted_registry() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("kv.db");

    {
        let store = Arc::new(SqliteStore::new(&db_path).unwrap());
        let handler = Handler::new(HandlerConfig { store: Some(store) }).unwrap();
        handler
            .add_asset(record("web01", &["10.0.0.1"], &["www"]))
            .unwrap();
        handler
            .add_asset(record("db01", &["10.0.0.2"], &[]))
            .unwrap();
    }

    let store = Arc::new(SqliteStore::new(&db_path).unwrap());
    let handler = Handler::new(HandlerConfig {
        store: Some(store.clone()),
    })
    .unwrap();
    assert_eq!(handler.registry_len(), 5);

    let mut event = handler
        .decode(br#"{"host": "www", "program": "nginx"}"#, EventKind::Syslog)
        .unwrap();
    handler.enrich(&mut event).unwrap();
    assert_eq!(event.assets().unwrap().asset.host, "web01");

    // the raw rows under the prefix match the registry keys
    assert_eq!(store.scan(REGISTRY_PREFIX).unwrap().len(), 5);
}

#[test]
fn test_load_order_beats_later_records() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("kv.db");

    // seed the store directly with two records claiming the same key;
    // scan order is key order, so "alpha-key" loads before "beta-key"
    let store = Arc::new(SqliteStore::new(&db_path).unwrap());
    let first = record("first", &["10.0.0.9"], &["shared"]);
    let second = record("second", &[], &["shared"]);
    store
        .set(
            REGISTRY_PREFIX,
            "alpha-key",
            &serde_json::to_vec(&first).unwrap(),
        )
        .unwrap();
    store
        .set(
            REGISTRY_PREFIX,
            "beta-key",
            &serde_json::to_vec(&second).unwrap(),
        )
        .unwrap();

    let handler = Handler::new(HandlerConfig { store: Some(store) }).unwrap();

    let mut event = handler
        .decode(br#"{"host": "shared"}"#, EventKind::Syslog)
        .unwrap();
    handler.enrich(&mut event).unwrap();
    assert_eq!(
        event.assets().unwrap().asset.host,
        "first",
        "a later record with a colliding key never overwrites"
    );
}

#[test]
fn test_full_decode_enrich_pipeline() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::new(&temp_dir.path().join("kv.db")).unwrap());
    let handler = Handler::new(HandlerConfig { store: Some(store) }).unwrap();

    handler
        .add_asset(record("web01", &["10.0.0.5"], &[]))
        .unwrap();
    handler
        .add_asset(record("ids-01", &["10.0.0.250"], &[]))
        .unwrap();

    let raw = br#"{
        "timestamp": "2024-03-01T10:00:00.000000+0000",
        "event_type": "alert",
        "host": "ids-01",
        "src_ip": "10.0.0.5",
        "dest_ip": "203.0.113.80",
        "proto": "TCP",
        "alert": {"signature": "ET POLICY curl outbound", "severity": 3}
    }"#;
    let mut event = handler.decode(raw, EventKind::Suricata).unwrap();
    handler.enrich(&mut event).unwrap();

    let links = event.assets().unwrap();
    assert_eq!(links.asset.domain.as_deref(), Some("corp.example"));
    assert_eq!(links.source.as_ref().unwrap().host, "web01");
    // unknown external destination stays a stub
    assert!(links.destination.as_ref().unwrap().host.is_empty());

    match &event {
        Event::Suricata(ev) => {
            assert_eq!(ev.alert.as_ref().unwrap().severity, Some(3));
        }
        other => panic!("unexpected event variant: {:?}", other),
    }

    let counts = handler.counts();
    assert_eq!(counts.events, 1);
    assert_eq!(counts.parse_errs.total(), 0);

    // enriched output serializes with the substituted links
    let json = serde_json::to_string(&event).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["assets"]["source"]["host"], "web01");

    handler.close().unwrap();
}

#[test]
fn test_decode_error_taxonomy() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::new(&temp_dir.path().join("kv.db")).unwrap());
    let handler = Handler::new(HandlerConfig { store: Some(store) }).unwrap();

    let err = handler.decode(b"not json at all", EventKind::Windows).unwrap_err();
    match err {
        EnrichdError::Decode { kind, .. } => assert_eq!(kind, EventKind::Windows),
        other => panic!("unexpected error: {:?}", other),
    }

    // per-event failures do not poison the handler
    let event = handler
        .decode(br#"{"host": {"name": "dc-01"}, "event_id": 4624}"#, EventKind::Windows)
        .unwrap();
    assert_eq!(event.assets().unwrap().asset.host, "dc-01");

    let counts = handler.counts();
    assert_eq!(counts.events, 2);
    assert_eq!(counts.parse_errs.windows, 1);
}
