//! The HTTP dispatcher.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → request-id header
//!     → table lookup (matcher + picker)
//!     → access-control predicate
//!     → redirect | websocket | fastcgi | reverse proxy
//!     → metrics + access log on completion
//! ```
//!
//! # Design Decisions
//! - The table reference is loaded once per request; a concurrent
//!   table swap never affects an in-flight request
//! - No retries against other targets; retrying is the client's call
//! - Response bodies stream through a metering wrapper so byte counts
//!   and latency cover the full transfer

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::Stream;
use url::Url;

use crate::config::Config;
use crate::observability::metrics;
use crate::proxy::headers::{add_headers, strip_hop_headers, strip_path_prefix};
use crate::proxy::{fcgi, ws};
use crate::route::{Matcher, Picker, SharedTable, Target};

/// Shared state of one data-plane listener.
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<Config>,
    pub table: Arc<SharedTable>,
    pub matcher: Matcher,
    pub picker: Picker,
    /// Upstream pool with certificate verification.
    pub client: reqwest::Client,
    /// Upstream pool for targets with tlsskipverify.
    pub insecure_client: reqwest::Client,
    /// Set while the process drains before shutdown.
    pub draining: Arc<AtomicBool>,
    /// Whether this listener terminated TLS.
    pub tls: bool,
}

impl ProxyState {
    pub fn new(
        config: Arc<Config>,
        table: Arc<SharedTable>,
        draining: Arc<AtomicBool>,
        tls: bool,
    ) -> Result<Self, String> {
        let matcher = Matcher::parse(&config.proxy.matcher)?;
        let picker = Picker::parse(&config.proxy.strategy)?;
        let (client, insecure_client) = build_clients(&config)?;
        Ok(Self {
            config,
            table,
            matcher,
            picker,
            client,
            insecure_client,
            draining,
            tls,
        })
    }
}

/// The two upstream pools, created once and reused for the process
/// lifetime.
fn build_clients(config: &Config) -> Result<(reqwest::Client, reqwest::Client), String> {
    let base = |insecure: bool| {
        let mut b = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .pool_max_idle_per_host(config.proxy.max_conn)
            .connect_timeout(Duration::from_secs(config.proxy.dial_timeout_secs));
        if config.proxy.keep_alive_timeout_secs > 0 {
            b = b.pool_idle_timeout(Duration::from_secs(config.proxy.keep_alive_timeout_secs));
        }
        if insecure {
            b = b.danger_accept_invalid_certs(true);
        }
        b.build().map_err(|e| format!("upstream client: {}", e))
    };
    Ok((base(false)?, base(true)?))
}

/// Main dispatcher. Every data-plane request lands here.
pub async fn dispatch(
    State(state): State<ProxyState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    mut request: axum::http::Request<Body>,
) -> Response {
    let upgrade = {
        use axum::extract::FromRequestParts;
        let (mut parts, body) = request.into_parts();
        let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &state)
            .await
            .ok();
        request = axum::http::Request::from_parts(parts, body);
        upgrade
    };

    if state.draining.load(Ordering::Relaxed) {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let cfg = &state.config.proxy;

    if !cfg.request_id_header.is_empty() {
        if let Ok(name) =
            axum::http::header::HeaderName::try_from(cfg.request_id_header.as_str())
        {
            let id = uuid::Uuid::new_v4().to_string();
            request
                .headers_mut()
                .insert(name, HeaderValue::try_from(id).unwrap());
        }
    }

    let host = request_host(&request);
    let path = request.uri().path().to_string();
    let raw_query = request.uri().query().unwrap_or("").to_string();

    // The table reference is held for the rest of the request.
    let table = state.table.current();
    let Some(target) = table.lookup(&host, &path, state.matcher, state.picker) else {
        return no_route(cfg);
    };

    if target.access_denied(remote.ip()) {
        return (StatusCode::FORBIDDEN, "access denied").into_response();
    }

    // Snapshot of the inbound URL before any rewriting; this is what
    // the access log reports.
    let request_url = format!(
        "{}://{}{}{}{}",
        if state.tls { "https" } else { "http" },
        host,
        path,
        if raw_query.is_empty() { "" } else { "?" },
        raw_query,
    );

    if target.redirects() {
        return redirect(target, &path, &raw_query);
    }

    let upstream_url = build_upstream_url(target, &path, &raw_query, cfg.strip_path);

    rewrite_host_header(&mut request, target, &upstream_url, &host);
    add_headers(request.headers_mut(), cfg, remote.ip(), state.tls);

    let is_websocket = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let is_fcgi = target.opts.get("proto").map(String::as_str) == Some("fcgi");

    if is_fcgi {
        return fcgi::serve(request, target, &upstream_url).await;
    }

    if is_websocket {
        if let Some(upgrade) = upgrade {
            return ws::handle_upgrade(
                upgrade,
                &upstream_url,
                target.tls_skip_verify,
                target.timer_name.clone(),
            );
        }
        return (StatusCode::BAD_REQUEST, "invalid websocket upgrade").into_response();
    }

    // Server-sent events and plain responses share the streaming
    // forward path; hyper flushes every body frame, so the configured
    // flush intervals are upper bounds that always hold.
    forward(&state, request, target, upstream_url, request_url).await
}

/// Host of the inbound request: the Host header for HTTP/1, the URI
/// authority for HTTP/2.
fn request_host(request: &axum::http::Request<Body>) -> String {
    request
        .headers()
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

fn no_route(cfg: &crate::config::ProxyConfig) -> Response {
    metrics::record_noroute();
    let status = match cfg.no_route_status {
        100..=999 => StatusCode::from_u16(cfg.no_route_status).unwrap_or(StatusCode::NOT_FOUND),
        _ => StatusCode::NOT_FOUND,
    };
    if cfg.no_route_html.is_empty() {
        status.into_response()
    } else {
        (
            status,
            [("content-type", "text/html; charset=utf-8")],
            cfg.no_route_html.clone(),
        )
            .into_response()
    }
}

fn redirect(target: &Target, path: &str, raw_query: &str) -> Response {
    let location = target.redirect_location(path, raw_query);
    let Ok(status) = StatusCode::from_u16(target.redirect_code) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let Ok(value) = HeaderValue::try_from(location) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    metrics::record_redirect(&target.timer_name, target.redirect_code);
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(axum::http::header::LOCATION, value);
    response
}

/// Build the upstream URL: target scheme and host, inbound path with
/// the strip prefix removed, target query first and inbound appended.
fn build_upstream_url(target: &Target, path: &str, raw_query: &str, global_strip: bool) -> Url {
    let mut url = target.url.clone();

    let path = if !target.strip_path.is_empty() {
        strip_path_prefix(path, &target.strip_path)
    } else if global_strip {
        // Backward-compatible global stripping: the first tag that
        // prefixes the path, otherwise the service name.
        let tag_prefix = target
            .tags
            .iter()
            .find(|t| path.starts_with(t.as_str()))
            .cloned()
            .unwrap_or_else(|| format!("/{}", target.service));
        strip_path_prefix(path, &tag_prefix)
    } else {
        path
    };
    url.set_path(path);

    let query = match (target.url.query(), raw_query) {
        (Some(t), "") => Some(t.to_string()),
        (Some(t), q) => Some(format!("{}&{}", t, q)),
        (None, "") => None,
        (None, q) => Some(q.to_string()),
    };
    url.set_query(query.as_deref());
    url
}

/// Outbound Host header: `dst` rewrites to the upstream host, an
/// explicit value is used literally, empty keeps the inbound host.
fn rewrite_host_header(
    request: &mut axum::http::Request<Body>,
    target: &Target,
    upstream: &Url,
    inbound_host: &str,
) {
    let value = match target.host.as_str() {
        "dst" => {
            let host = upstream.host_str().unwrap_or_default();
            match upstream.port() {
                Some(p) => format!("{}:{}", host, p),
                None => host.to_string(),
            }
        }
        "" => inbound_host.to_string(),
        explicit => explicit.to_string(),
    };
    if let Ok(value) = HeaderValue::try_from(value) {
        request.headers_mut().insert("host", value);
    }
}

async fn forward(
    state: &ProxyState,
    request: axum::http::Request<Body>,
    target: &Target,
    upstream_url: Url,
    request_url: String,
) -> Response {
    let cfg = &state.config.proxy;
    let client = if target.tls_skip_verify {
        &state.insecure_client
    } else {
        &state.client
    };

    let (mut parts, body) = request.into_parts();
    strip_hop_headers(&mut parts.headers);

    let method = parts.method.clone();
    let outbound = client
        .request(parts.method, upstream_url.as_str())
        .headers(parts.headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()));

    let start = Instant::now();
    // reqwest resolves the send future once response headers arrive,
    // so a timeout here is exactly the response-header timeout.
    let sent = if cfg.response_header_timeout_secs > 0 {
        match tokio::time::timeout(
            Duration::from_secs(cfg.response_header_timeout_secs),
            outbound.send(),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => {
                tracing::warn!(upstream = %upstream_url, "Upstream response headers timed out");
                metrics::record_request(&target.timer_name, 504, start.elapsed());
                return (StatusCode::GATEWAY_TIMEOUT, "upstream timed out").into_response();
            }
        }
    } else {
        outbound.send().await
    };

    let upstream_response = match sent {
        Ok(r) => r,
        Err(e) => {
            let status = if e.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            tracing::warn!(
                upstream = %upstream_url,
                service = %target.service,
                error = %e,
                "Upstream request failed"
            );
            metrics::record_request(&target.timer_name, status.as_u16(), start.elapsed());
            return (status, "upstream request failed").into_response();
        }
    };

    let status = upstream_response.status();
    let mut response_headers = upstream_response.headers().clone();
    strip_hop_headers(&mut response_headers);

    let meter = ResponseMeter {
        start,
        method,
        status: status.as_u16(),
        request_url,
        upstream_addr: upstream_url.authority().to_string(),
        upstream_url: upstream_url.to_string(),
        service: target.service.clone(),
        timer_name: target.timer_name.clone(),
        bytes: 0,
        done: false,
    };
    let body = Body::from_stream(MeteredStream {
        inner: Box::pin(upstream_response.bytes_stream()),
        meter,
    });

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// Everything the access log and the timers need once the response
/// body has fully streamed (or the client went away).
struct ResponseMeter {
    start: Instant,
    method: Method,
    status: u16,
    request_url: String,
    upstream_addr: String,
    upstream_url: String,
    service: String,
    timer_name: String,
    bytes: u64,
    done: bool,
}

impl ResponseMeter {
    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let duration = self.start.elapsed();
        metrics::record_request(&self.timer_name, self.status, duration);
        tracing::info!(
            target: "access",
            method = %self.method,
            url = %self.request_url,
            status = self.status,
            bytes = self.bytes,
            duration_ms = duration.as_millis() as u64,
            upstream_addr = %self.upstream_addr,
            upstream_url = %self.upstream_url,
            upstream_service = %self.service,
            "request"
        );
    }
}

/// Response body passthrough that counts bytes and finalizes metrics
/// when the transfer ends, by either completion or disconnect.
struct MeteredStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    meter: ResponseMeter,
}

impl Stream for MeteredStream {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.meter.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.meter.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.meter.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        self.meter.finish();
    }
}
