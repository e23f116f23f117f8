//! Discovery loop behavior against fabricated listeners and real upstreams.

mod common;

use std::sync::Arc;

use common::{serve_listener, spawn_upstream, test_state, StaticScanner};
use localport_proxy::DiscoveryLoop;

#[tokio::test]
async fn discovers_a_service_and_names_it_from_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    let upstream = spawn_upstream("hello from myapp").await;

    let scanner = Arc::new(StaticScanner::default());
    scanner.set(vec![serve_listener(upstream.port(), "/tmp/myapp", None)]);

    let discovery = DiscoveryLoop::new(Arc::clone(&state), scanner);
    discovery.pass().await;

    let record = state.store.get_by_name("myapp.localhost").expect("record created");
    assert_eq!(record.port, upstream.port());
    assert!(!record.use_tls);
    assert!(record.is_active);
    assert!(!record.user_defined);

    let entry = state.table.get("myapp.localhost").expect("table entry");
    assert_eq!(entry.port, upstream.port());
    assert!(entry.is_active);
}

#[tokio::test]
async fn second_service_from_same_cwd_gets_a_numbered_name() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    let first = spawn_upstream("one").await;
    let second = spawn_upstream("two").await;

    let scanner = Arc::new(StaticScanner::default());
    scanner.set(vec![
        serve_listener(first.port(), "/tmp/myapp", Some("--first")),
        serve_listener(second.port(), "/tmp/myapp", Some("--second")),
    ]);

    let discovery = DiscoveryLoop::new(Arc::clone(&state), scanner.clone());
    discovery.pass().await;

    assert!(state.store.get_by_name("myapp.localhost").is_some());
    assert!(state.store.get_by_name("myapp-1.localhost").is_some());

    // First server dies; the survivor keeps its numbered name.
    scanner.set(vec![serve_listener(second.port(), "/tmp/myapp", Some("--second"))]);
    discovery.pass().await;

    let gone = state.store.get_by_name("myapp.localhost").unwrap();
    assert!(!gone.is_active);
    let survivor = state.store.get_by_name("myapp-1.localhost").unwrap();
    assert!(survivor.is_active);
    assert_eq!(survivor.port, second.port());
}

#[tokio::test]
async fn reactivated_service_keeps_its_name_and_state() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    let upstream = spawn_upstream("hello").await;
    let listener = serve_listener(upstream.port(), "/tmp/myapp", None);

    let scanner = Arc::new(StaticScanner::default());
    scanner.set(vec![listener.clone()]);
    let discovery = DiscoveryLoop::new(Arc::clone(&state), scanner.clone());

    discovery.pass().await;
    scanner.set(vec![]);
    discovery.pass().await;
    assert!(!state.store.get_by_name("myapp.localhost").unwrap().is_active);

    scanner.set(vec![listener]);
    discovery.pass().await;

    let record = state.store.get_by_name("myapp.localhost").unwrap();
    assert!(record.is_active);
    // No duplicate record appeared.
    assert_eq!(state.store.list().len(), 1);
}

#[tokio::test]
async fn blacklisted_executables_never_appear() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());
    state
        .blacklist
        .add(localport_storage::BlacklistType::Pattern, "^/opt/evil/")
        .unwrap();

    let upstream = spawn_upstream("evil").await;
    let mut listener = serve_listener(upstream.port(), "/opt/evil", None);
    listener.exe_path = "/opt/evil/server".to_string();

    let scanner = Arc::new(StaticScanner::default());
    scanner.set(vec![listener]);
    let discovery = DiscoveryLoop::new(Arc::clone(&state), scanner);

    for _ in 0..3 {
        discovery.pass().await;
    }
    assert!(state.store.list().is_empty());
    assert!(state.table.is_empty());
}

#[tokio::test]
async fn own_listen_ports_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    // A live upstream on the daemon's own HTTP port number would loop.
    let scanner = Arc::new(StaticScanner::default());
    scanner.set(vec![serve_listener(state.options.http_port, "/tmp/self", None)]);

    let discovery = DiscoveryLoop::new(Arc::clone(&state), scanner);
    discovery.pass().await;
    assert!(state.store.list().is_empty());
}

#[tokio::test]
async fn non_http_listeners_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path());

    // Nothing listens on this port; the probe yields None.
    let closed = {
        let sock = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        sock.local_addr().unwrap().port()
    };

    let scanner = Arc::new(StaticScanner::default());
    scanner.set(vec![serve_listener(closed, "/tmp/notp", None)]);

    let discovery = DiscoveryLoop::new(Arc::clone(&state), scanner);
    discovery.pass().await;
    assert!(state.store.list().is_empty());
}

#[tokio::test]
async fn user_rename_survives_restart_and_rediscovery() {
    let dir = tempfile::tempdir().unwrap();
    let upstream = spawn_upstream("hello").await;
    let listener = serve_listener(upstream.port(), "/tmp/myapp", None);

    {
        let state = test_state(dir.path());
        let scanner = Arc::new(StaticScanner::default());
        scanner.set(vec![listener.clone()]);
        DiscoveryLoop::new(Arc::clone(&state), scanner).pass().await;

        let record = state.store.get_by_name("myapp.localhost").unwrap();
        state.store.update_name(&record.id, "api.localhost").unwrap();
    }

    // Daemon restart: preload then rediscover the same process.
    let state = test_state(dir.path());
    state.preload();
    let scanner = Arc::new(StaticScanner::default());
    scanner.set(vec![listener]);
    DiscoveryLoop::new(Arc::clone(&state), scanner).pass().await;

    let record = state.store.get_by_name("api.localhost").expect("rename survived");
    assert!(record.user_defined);
    assert!(record.is_active);
    assert!(state.store.get_by_name("myapp.localhost").is_none());
}
