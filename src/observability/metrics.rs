//! Metrics collection and exposition.
//!
//! Metric names are flat dotted keys in the style of the routing
//! table: `requests`, `notfound`, `http.status.<code>` and one
//! latency histogram per target. Target histograms are addressed by
//! name through the global registry, so an unchanged target keeps its
//! histogram across table rebuilds.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

static PREFIX: OnceLock<String> = OnceLock::new();

/// Initialize the Prometheus exporter and its scrape listener.
pub fn init(addr: SocketAddr, prefix: &str) -> Result<(), String> {
    let _ = PREFIX.set(prefix.to_string());
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("cannot install Prometheus recorder: {}", e))?;

    tracing::info!(address = %addr, "Metrics server listening");
    Ok(())
}

fn name(key: &str) -> String {
    match PREFIX.get().filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}.{}", prefix, key),
        None => key.to_string(),
    }
}

/// Record one completed request into the overall timer, the target's
/// timer and the status-code timer.
pub fn record_request(target_timer: &str, status: u16, duration: Duration) {
    let secs = duration.as_secs_f64();
    histogram!(name("requests")).record(secs);
    histogram!(name(target_timer)).record(secs);
    histogram!(name(&format!("http.status.{}", status))).record(secs);
}

/// A redirect answered by the router itself: zero-duration samples on
/// the target and status-code timers only, the overall requests timer
/// counts proxied traffic.
pub fn record_redirect(target_timer: &str, status: u16) {
    histogram!(name(target_timer)).record(0.0);
    histogram!(name(&format!("http.status.{}", status))).record(0.0);
}

/// A request that matched no route.
pub fn record_noroute() {
    counter!(name("notfound")).increment(1);
}
