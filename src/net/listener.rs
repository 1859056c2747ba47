//! Data-plane listeners.
//!
//! # Responsibilities
//! - Bind each configured listener (http, https, tcp+sni)
//! - Build the dispatch router with its middleware stack
//! - Close listeners on the shutdown signal
//!
//! # Design Decisions
//! - One listener per task; a bind failure at startup is fatal
//! - A panic anywhere in the dispatch path turns into a 500, never a
//!   dead process

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::config::ListenConfig;
use crate::proxy::{self, gzip, tcp_sni, ProxyState};
use crate::route::Picker;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// The address does not parse.
    Addr(String),
    /// Failed to bind or serve.
    Bind(std::io::Error),
    /// The cert source is unusable.
    Tls(String),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Addr(a) => write!(f, "invalid listener address {:?}", a),
            ListenerError::Bind(e) => write!(f, "failed to bind: {}", e),
            ListenerError::Tls(e) => write!(f, "TLS setup failed: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// The dispatch router for one listener, with the middleware stack
/// applied outermost-first: panic recovery, tracing, optional request
/// timeout, optional gzip.
fn build_router(listen: &ListenConfig, state: ProxyState) -> Router {
    let timeout = listen.read_timeout_secs;
    let gzip_pattern = state.config.proxy.gzip_content_types.clone();

    let mut router = Router::new()
        .fallback(proxy::dispatch)
        .with_state(state);

    if let Some(layer) = gzip::layer(&gzip_pattern) {
        router = router.layer(layer);
    }
    if timeout > 0 {
        router = router.layer(tower_http::timeout::TimeoutLayer::new(
            std::time::Duration::from_secs(timeout),
        ));
    }
    router
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

/// Serve one http listener until shutdown.
pub async fn serve_http(
    listen: ListenConfig,
    state: ProxyState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ListenerError> {
    let addr: SocketAddr = listen
        .addr
        .parse()
        .map_err(|_| ListenerError::Addr(listen.addr.clone()))?;
    let router = build_router(&listen, state);

    let handle = Handle::new();
    let h = handle.clone();
    tokio::spawn(async move {
        let _ = shutdown.recv().await;
        h.shutdown();
    });

    tracing::info!(address = %addr, proto = "http", "Listener up");
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(ListenerError::Bind)
}

/// Serve one https listener until shutdown.
pub async fn serve_https(
    listen: ListenConfig,
    state: ProxyState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ListenerError> {
    let addr: SocketAddr = listen
        .addr
        .parse()
        .map_err(|_| ListenerError::Addr(listen.addr.clone()))?;
    let source = listen
        .cert_source
        .as_ref()
        .ok_or_else(|| ListenerError::Tls("https listener without cert_source".into()))?;
    let tls = crate::net::tls::server_config(source).map_err(ListenerError::Tls)?;
    let router = build_router(&listen, state);

    let handle = Handle::new();
    let h = handle.clone();
    tokio::spawn(async move {
        let _ = shutdown.recv().await;
        h.shutdown();
    });

    tracing::info!(address = %addr, proto = "https", "Listener up");
    axum_server::bind_rustls(addr, RustlsConfig::from_config(tls))
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(ListenerError::Bind)
}

/// Serve one tcp+sni listener until shutdown.
pub async fn serve_tcp_sni(
    listen: ListenConfig,
    table: Arc<crate::route::SharedTable>,
    picker: Picker,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ListenerError> {
    let listener = TcpListener::bind(&listen.addr)
        .await
        .map_err(ListenerError::Bind)?;
    tracing::info!(address = %listen.addr, proto = "tcp+sni", "Listener up");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "tcp+sni: connection accepted");
                        let table = table.clone();
                        tokio::spawn(tcp_sni::handle(stream, table, picker));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "tcp+sni: accept failed");
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!(address = %listen.addr, "tcp+sni: listener closing");
                return Ok(());
            }
        }
    }
}
