//! WebSocket proxying end to end.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use switchyard::config::Config;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

mod common;

/// A websocket upstream that echoes every message.
async fn start_ws_echo_upstream(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() || msg.is_binary() {
                        if ws.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });
}

#[tokio::test]
async fn test_websocket_echo_through_proxy() {
    let upstream_addr: SocketAddr = "127.0.0.1:29201".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:29202".parse().unwrap();

    start_ws_echo_upstream(upstream_addr).await;
    common::start_proxy(
        proxy_addr,
        &format!("route add ws / ws://{}/", upstream_addr),
        Config::default(),
    )
    .await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/chat", proxy_addr))
        .await
        .expect("websocket upgrade through proxy failed");

    ws.send(Message::text("ping-through-proxy")).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    assert_eq!(echoed.into_text().unwrap().as_str(), "ping-through-proxy");

    // A larger binary payload round-trips intact.
    let payload: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    ws.send(Message::binary(payload.clone())).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    match echoed {
        Message::Binary(b) => assert_eq!(b.as_ref(), payload.as_slice()),
        other => panic!("expected binary echo, got {:?}", other),
    }

    ws.close(None).await.unwrap();
}
