//! End-to-end dispatcher tests against real listeners.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use switchyard::config::Config;

mod common;

#[tokio::test]
async fn test_basic_forward_appends_x_forwarded_for() {
    let upstream_addr: SocketAddr = "127.0.0.1:29101".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:29102".parse().unwrap();

    common::start_echo_upstream(upstream_addr).await;
    common::start_proxy(
        proxy_addr,
        &format!("route add m / http://{}/", upstream_addr),
        Config::default(),
    )
    .await;

    let res = common::client()
        .get(format!("http://{}/", proxy_addr))
        .header("X-Forwarded-For", "3.3.3.3")
        .send()
        .await
        .expect("proxy unreachable");

    assert_eq!(res.status(), 200);
    let body = res.text().await.unwrap().to_lowercase();
    assert!(
        body.contains("x-forwarded-for: 3.3.3.3, 127.0.0.1"),
        "missing appended XFF in: {}",
        body
    );
    assert!(body.contains("x-real-ip: 127.0.0.1"));
    assert!(body.contains("x-forwarded-proto: http"));
}

#[tokio::test]
async fn test_no_route_returns_configured_status() {
    let proxy_addr: SocketAddr = "127.0.0.1:29103".parse().unwrap();

    let mut config = Config::default();
    config.proxy.no_route_status = 929;
    config.proxy.no_route_html = "<h1>no route</h1>".to_string();
    common::start_proxy(proxy_addr, "", config).await;

    let res = common::client()
        .get(format!("http://{}/anything", proxy_addr))
        .send()
        .await
        .expect("proxy unreachable");

    assert_eq!(res.status().as_u16(), 929);
    assert_eq!(res.text().await.unwrap(), "<h1>no route</h1>");
}

#[tokio::test]
async fn test_redirect_route() {
    let proxy_addr: SocketAddr = "127.0.0.1:29104".parse().unwrap();

    common::start_proxy(
        proxy_addr,
        "route add svc www.ex.com/old http://ignored/ redirect 301 /new",
        Config::default(),
    )
    .await;

    let res = common::client()
        .get(format!("http://{}/old", proxy_addr))
        .header("Host", "www.ex.com")
        .send()
        .await
        .expect("proxy unreachable");

    assert_eq!(res.status(), 301);
    assert_eq!(res.headers().get("location").unwrap(), "/new");
}

#[tokio::test]
async fn test_strip_path_only_on_segment_boundary() {
    let upstream_addr: SocketAddr = "127.0.0.1:29105".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:29106".parse().unwrap();

    common::start_echo_upstream(upstream_addr).await;
    common::start_proxy(
        proxy_addr,
        &format!(
            "route add svc / http://{}/ opts \"strip=/svc\"",
            upstream_addr
        ),
        Config::default(),
    )
    .await;

    let client = common::client();

    let body = client
        .get(format!("http://{}/svc/x", proxy_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.starts_with("GET /x HTTP/1.1"), "got: {}", body);

    let body = client
        .get(format!("http://{}/svcx", proxy_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.starts_with("GET /svcx HTTP/1.1"), "got: {}", body);
}

#[tokio::test]
async fn test_host_routing_prefers_host_bucket() {
    let a_addr: SocketAddr = "127.0.0.1:29107".parse().unwrap();
    let b_addr: SocketAddr = "127.0.0.1:29108".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:29109".parse().unwrap();

    common::start_mock_upstream(a_addr, "host-specific").await;
    common::start_mock_upstream(b_addr, "wildcard").await;
    common::start_proxy(
        proxy_addr,
        &format!(
            "route add a www.ex.com/ http://{}/\nroute add b / http://{}/",
            a_addr, b_addr
        ),
        Config::default(),
    )
    .await;

    let client = common::client();

    let body = client
        .get(format!("http://{}/", proxy_addr))
        .header("Host", "www.ex.com")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "host-specific");

    let body = client
        .get(format!("http://{}/", proxy_addr))
        .header("Host", "other.example.org")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "wildcard");
}

#[tokio::test]
async fn test_sse_first_event_arrives_promptly() {
    let upstream_addr: SocketAddr = "127.0.0.1:29110".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:29111".parse().unwrap();

    common::start_sse_upstream(upstream_addr).await;
    common::start_proxy(
        proxy_addr,
        &format!("route add sse / http://{}/", upstream_addr),
        Config::default(),
    )
    .await;

    let start = Instant::now();
    let res = common::client()
        .get(format!("http://{}/events", proxy_addr))
        .header("Accept", "text/event-stream")
        .send()
        .await
        .expect("proxy unreachable");

    let mut stream = res.bytes_stream();
    let first = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("no event within 2s")
        .expect("stream ended")
        .expect("stream error");

    // The upstream holds its connection for 5s; getting the first
    // chunk this early proves the proxy streams without buffering.
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(String::from_utf8_lossy(&first).contains("first-ev"));
}

#[tokio::test]
async fn test_table_swap_reroutes_new_requests() {
    let a_addr: SocketAddr = "127.0.0.1:29112".parse().unwrap();
    let b_addr: SocketAddr = "127.0.0.1:29113".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:29114".parse().unwrap();

    common::start_mock_upstream(a_addr, "generation-1").await;
    common::start_mock_upstream(b_addr, "generation-2").await;
    let table = common::start_proxy(
        proxy_addr,
        &format!("route add m / http://{}/", a_addr),
        Config::default(),
    )
    .await;

    let client = common::client();
    let body = client
        .get(format!("http://{}/", proxy_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "generation-1");

    table.publish(
        switchyard::route::Table::parse(&format!("route add m / http://{}/", b_addr)).unwrap(),
    );

    let body = client
        .get(format!("http://{}/", proxy_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "generation-2");
}

#[tokio::test]
async fn test_access_denied_source() {
    let upstream_addr: SocketAddr = "127.0.0.1:29115".parse().unwrap();
    let proxy_addr: SocketAddr = "127.0.0.1:29116".parse().unwrap();

    common::start_mock_upstream(upstream_addr, "secret").await;
    common::start_proxy(
        proxy_addr,
        &format!(
            "route add svc / http://{}/ opts \"allow=ip:10.0.0.0/8\"",
            upstream_addr
        ),
        Config::default(),
    )
    .await;

    // The test client comes from 127.0.0.1, which is not allowed.
    let res = common::client()
        .get(format!("http://{}/", proxy_addr))
        .send()
        .await
        .expect("proxy unreachable");

    assert_eq!(res.status(), 403);
}
