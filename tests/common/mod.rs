//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use switchyard::config::{Config, ListenConfig};
use switchyard::net;
use switchyard::proxy::ProxyState;
use switchyard::route::{SharedTable, Table};
use switchyard::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Start a simple mock upstream that returns a fixed body.
pub async fn start_mock_upstream(addr: SocketAddr, response: &'static str) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 8192];
                        let _ = socket.read(&mut buf).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start a mock upstream that echoes the raw request head back as the
/// response body, so tests can assert on forwarded headers and paths.
pub async fn start_echo_upstream(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut head = Vec::new();
                        let mut buf = [0u8; 1024];
                        loop {
                            let n = match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => n,
                            };
                            head.extend_from_slice(&buf[..n]);
                            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            head.len()
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.write_all(&head).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start an SSE-style upstream that sends one chunk immediately and
/// keeps the connection open afterwards.
pub async fn start_sse_upstream(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 8192];
                        let _ = socket.read(&mut buf).await;
                        let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n";
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(b"10\r\ndata: first-ev\n\n\r\n").await;
                        let _ = socket.flush().await;
                        // Hold the stream open; the client should see
                        // the first event long before this ends.
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        let _ = socket.write_all(b"0\r\n\r\n").await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start a proxy listener over the given route commands and return
/// its shared table for later swaps.
pub async fn start_proxy(proxy_addr: SocketAddr, routes: &str, config: Config) -> Arc<SharedTable> {
    let table = Arc::new(SharedTable::new());
    table.publish(Table::parse(routes).unwrap());

    let state = ProxyState::new(
        Arc::new(config),
        table.clone(),
        Arc::new(AtomicBool::new(false)),
        false,
    )
    .unwrap();

    let listen = ListenConfig {
        addr: proxy_addr.to_string(),
        ..ListenConfig::default()
    };
    // The coordinator lives for the whole test binary.
    let shutdown: &'static Shutdown = Box::leak(Box::new(Shutdown::new()));
    tokio::spawn(net::serve_http(listen, state, shutdown.subscribe()));
    tokio::time::sleep(Duration::from_millis(300)).await;

    table
}

/// A client that talks to the proxy without pooling surprises.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
