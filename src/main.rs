//! Process entry point: load config, wire subsystems, run listeners.

use std::sync::Arc;
use std::time::Duration;

use switchyard::config::{self, Config};
use switchyard::lifecycle::Shutdown;
use switchyard::observability::{logging, metrics};
use switchyard::proxy::ProxyState;
use switchyard::registry::{self, watch};
use switchyard::route::{Picker, SharedTable};
use switchyard::{admin, net};

fn main() {
    let arg = std::env::args().nth(1);
    let config = match config::load(arg.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[FATAL] {}", e);
            std::process::exit(1);
        }
    };

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.runtime.worker_threads > 0 {
        builder.worker_threads(config.runtime.worker_threads);
    }
    let runtime = builder.build().expect("tokio runtime");

    if let Err(e) = runtime.block_on(run(config)) {
        eprintln!("[FATAL] {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), String> {
    logging::init();

    // TLS builders (listeners, websocket dials) resolve the process
    // default crypto provider; pick one before anything touches rustls.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let config = Arc::new(config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");
    tracing::info!(
        "Runtime config\n{}",
        serde_json::to_string_pretty(&*config).unwrap_or_default()
    );

    // Metrics come first; everything else records into them.
    if config.metrics.enabled {
        let addr = config
            .metrics
            .addr
            .parse()
            .map_err(|_| format!("invalid metrics address {:?}", config.metrics.addr))?;
        metrics::init(addr, &config.metrics.prefix)?;
    }

    let table = Arc::new(SharedTable::new());

    // Registry: register ourselves, then fold its snapshot streams
    // into published tables.
    let backend = registry::new_backend(&config).map_err(|e| e.to_string())?;
    backend.register().await.map_err(|e| e.to_string())?;
    let services = backend.watch_services();
    let manual = backend.watch_manual();
    tokio::spawn(watch::watch_routes(services, manual, table.clone()));

    // Admin plane.
    {
        let config = config.clone();
        let table = table.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(config, table).await {
                tracing::error!(error = %e, "Admin server failed");
            }
        });
    }

    let shutdown = Shutdown::new();

    // Data plane listeners.
    let picker = Picker::parse(&config.proxy.strategy)?;
    let mut servers = Vec::new();
    for listen in &config.listen {
        match listen.proto.as_str() {
            "http" => {
                let state = ProxyState::new(
                    config.clone(),
                    table.clone(),
                    shutdown.draining_flag(),
                    false,
                )?;
                servers.push(tokio::spawn(net::serve_http(
                    listen.clone(),
                    state,
                    shutdown.subscribe(),
                )));
            }
            "https" => {
                let state = ProxyState::new(
                    config.clone(),
                    table.clone(),
                    shutdown.draining_flag(),
                    true,
                )?;
                servers.push(tokio::spawn(net::serve_https(
                    listen.clone(),
                    state,
                    shutdown.subscribe(),
                )));
            }
            "tcp+sni" => {
                servers.push(tokio::spawn(net::serve_tcp_sni(
                    listen.clone(),
                    table.clone(),
                    picker,
                    shutdown.subscribe(),
                )));
            }
            other => return Err(format!("unknown listener proto {:?}", other)),
        }
    }
    if servers.is_empty() {
        return Err("no listeners configured".to_string());
    }

    // Shutdown sequence: deregister, drain for shutdown_wait, close
    // listeners.
    {
        let backend = backend.clone();
        let wait = Duration::from_secs(config.proxy.shutdown_wait_secs);
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("Shutdown signal received");
            backend.deregister().await;
            shutdown.drain();
            if !wait.is_zero() {
                tracing::info!(wait_secs = wait.as_secs(), "Draining");
                tokio::time::sleep(wait).await;
            }
            shutdown.trigger();
        });
    }

    for server in servers {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.to_string()),
            Err(e) => return Err(format!("listener task failed: {}", e)),
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Cannot install SIGTERM handler");
            return std::future::pending().await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
