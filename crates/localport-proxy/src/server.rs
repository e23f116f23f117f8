//! Listeners and lifecycle.
//!
//! One plaintext listener and, when the CA is initialized, one TLS listener
//! with per-SNI certificates from the leaf issuer. Both serve the same
//! router. Shutdown is signal-driven: the TLS listener closes first (its
//! issuer cache is process-local), then the plaintext one, bounded by a
//! shared 5 second drain window.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use localport_tls::{CertResolver, LeafIssuer};

use crate::error::{ProxyError, Result};
use crate::state::SharedState;
use crate::{api, dashboard, router};

/// Shutdown drain window shared by both listeners.
const DRAIN_WINDOW: Duration = Duration::from_secs(5);

/// Builds the shared router: admin API, dashboard fallback, host dispatch.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/services", get(api::list_services))
        .route("/api/rename", post(api::rename))
        .route("/api/blacklist", post(api::blacklist))
        .route("/api/keep", post(api::keep))
        .fallback(dashboard::serve)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            router::dispatch_by_host,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs both listeners until SIGINT/SIGTERM.
pub async fn run(state: SharedState, issuer: Option<Arc<LeafIssuer>>) -> Result<()> {
    let app = build_router(Arc::clone(&state));

    let http_addr = SocketAddr::from(([0, 0, 0, 0], state.options.http_port));
    let http_listener = bind(http_addr)?;
    info!("listening on {http_addr} (HTTP)");

    let (http_shutdown, _) = broadcast::channel::<()>(1);
    let (https_shutdown, _) = broadcast::channel::<()>(1);

    let mut http_rx = http_shutdown.subscribe();
    let http_task = tokio::spawn(
        axum::serve(http_listener, app.clone().into_make_service())
            .with_graceful_shutdown(async move {
                let _ = http_rx.recv().await;
            })
            .into_future(),
    );

    // The TLS listener only exists once the CA can actually issue leaves.
    let https_task = match issuer.filter(|_| state.options.tls_enabled) {
        Some(issuer) => {
            let https_addr = SocketAddr::from(([0, 0, 0, 0], state.options.https_port));
            let https_listener = bind(https_addr)?;
            info!("listening on {https_addr} (HTTPS, dynamic certs via local CA)");

            let mut config = rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_cert_resolver(Arc::new(CertResolver::new(issuer)));
            config.alpn_protocols = vec![b"http/1.1".to_vec()];
            let acceptor = TlsAcceptor::from(Arc::new(config));

            let https_app = app.layer(axum::middleware::map_request(router::add_forwarded_proto));
            let rx = https_shutdown.subscribe();
            Some(tokio::spawn(https_loop(
                https_listener,
                acceptor,
                https_app,
                rx,
            )))
        }
        None => None,
    };

    shutdown_signal().await;
    info!("shutting down");

    // HTTPS first, then HTTP, then drain both within the shared window.
    let _ = https_shutdown.send(());
    let _ = http_shutdown.send(());

    let drain = async {
        if let Some(task) = https_task {
            let _ = task.await;
        }
        let _ = http_task.await;
    };
    if tokio::time::timeout(DRAIN_WINDOW, drain).await.is_err() {
        warn!("drain window elapsed, dropping outstanding connections");
    }

    info!("daemon stopped");
    Ok(())
}

/// TLS accept loop: handshake with dynamic certificates, then serve the
/// router over the encrypted stream.
async fn https_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("TLS accept error: {e}");
                        continue;
                    }
                };
                tokio::spawn(serve_tls_connection(stream, peer, acceptor.clone(), app.clone()));
            }
        }
    }
}

async fn serve_tls_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    app: Router,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(tls_stream) => tls_stream,
        Err(e) => {
            // Includes policy rejections surfaced as missing certificates.
            debug!(%peer, "TLS handshake failed: {e}");
            return;
        }
    };

    let io = TokioIo::new(tls_stream);
    let service = hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
        let app = app.clone();
        async move { tower::ServiceExt::oneshot(app, request).await }
    });

    if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
    {
        debug!(%peer, "TLS connection error: {e}");
    }
}

/// Binds a listener with SO_REUSEADDR so restarts survive lingering sockets.
fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ProxyError::Bind(addr, e))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| ProxyError::Bind(addr, e))?;
    socket
        .bind(&addr.into())
        .map_err(|e| ProxyError::Bind(addr, e))?;
    socket.listen(1024).map_err(|e| ProxyError::Bind(addr, e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| ProxyError::Bind(addr, e))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(|e| ProxyError::Bind(addr, e))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
