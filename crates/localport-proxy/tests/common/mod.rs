//! Shared fixtures for the daemon integration tests.
#![allow(dead_code)]

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Router;
use parking_lot::Mutex;

use localport_core::naming::NameGenerator;
use localport_core::notify::{LogNotifier, NotifyConfig, NotifyManager};
use localport_core::portscan::{Listener, PortScanner};
use localport_core::Result as CoreResult;
use localport_storage::{BlacklistStore, ServiceStore};

use localport_proxy::{AppState, DaemonOptions, SharedState};

/// Scanner returning whatever listeners the test put in.
#[derive(Default)]
pub struct StaticScanner {
    listeners: Mutex<Vec<Listener>>,
}

impl StaticScanner {
    pub fn set(&self, listeners: Vec<Listener>) {
        *self.listeners.lock() = listeners;
    }
}

impl PortScanner for StaticScanner {
    fn scan(&self) -> CoreResult<Vec<Listener>> {
        Ok(self.listeners.lock().clone())
    }
}

/// App state over stores in `dir`, silent notifications, high ports.
pub fn test_state(dir: &Path) -> SharedState {
    let store = Arc::new(ServiceStore::open(dir.join("services.json")).unwrap());
    let blacklist = Arc::new(BlacklistStore::open(dir.join("blacklist.json")).unwrap());
    let notify = Arc::new(NotifyManager::new(
        NotifyConfig {
            enabled: false,
            ..Default::default()
        },
        Box::new(LogNotifier),
    ));
    AppState::new(
        store,
        blacklist,
        NameGenerator::with_builtin_rules(),
        notify,
        DaemonOptions {
            http_port: 8080,
            https_port: 8443,
            tls_enabled: false,
            ..Default::default()
        },
    )
}

/// An upstream HTTP server that answers `body` on every path and echoes the
/// Host and X-Forwarded-Host headers it received.
pub async fn spawn_upstream(body: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |headers: HeaderMap| async move {
        let echo = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        (
            [
                ("echo-host", echo("host")),
                ("echo-forwarded-host", echo("x-forwarded-host")),
                ("echo-forwarded-proto", echo("x-forwarded-proto")),
            ],
            body,
        )
            .into_response()
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app.into_make_service()).into_future());
    addr
}

/// A fabricated listener shaped like a directory server run from `cwd`.
pub fn serve_listener(port: u16, cwd: &str, extra_arg: Option<&str>) -> Listener {
    let mut args = vec!["serve".to_string()];
    if let Some(arg) = extra_arg {
        args.push(arg.to_string());
    }
    Listener {
        port,
        pid: 4000 + u32::from(port % 1000),
        exe_path: "/usr/local/bin/serve".to_string(),
        cwd: cwd.to_string(),
        args,
    }
}
