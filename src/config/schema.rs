//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Proxy behavior (strategy, matcher, timeouts, header rewriting).
    pub proxy: ProxyConfig,

    /// Data-plane listeners.
    pub listen: Vec<ListenConfig>,

    /// Service registry driving the routing table.
    pub registry: RegistryConfig,

    /// Metrics exposition.
    pub metrics: MetricsConfig,

    /// Admin API and dashboard.
    pub admin: AdminConfig,

    /// Runtime sizing.
    pub runtime: RuntimeConfig,
}

/// Proxy behavior configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Maximum concurrent connections per data-plane listener.
    pub max_conn: usize,

    /// Target picking strategy: "rnd" or "rr".
    pub strategy: String,

    /// Route matching strategy: "prefix" or "glob".
    pub matcher: String,

    /// Status code returned when no route matches. Values outside
    /// 100..=999 fall back to 404 at dispatch time.
    pub no_route_status: u16,

    /// Optional HTML body returned with the no-route status.
    pub no_route_html: String,

    /// How long to answer 503 before listeners close on shutdown.
    pub shutdown_wait_secs: u64,

    /// Upstream connect timeout in seconds.
    pub dial_timeout_secs: u64,

    /// Time allowed for upstream response headers. 0 disables.
    pub response_header_timeout_secs: u64,

    /// Idle keep-alive for pooled upstream connections. 0 uses the
    /// client default.
    pub keep_alive_timeout_secs: u64,

    /// Flush interval for server-sent events, in milliseconds.
    /// Must be > 0 to be effective.
    pub flush_interval_ms: u64,

    /// Flush interval for all other proxied responses, in milliseconds.
    pub global_flush_interval_ms: u64,

    /// Strip the matched route prefix from the upstream path when the
    /// target does not carry its own `strip=` opt.
    pub strip_path: bool,

    /// Local IP advertised in the `Forwarded: by=` parameter.
    pub local_ip: String,

    /// Extra header set to the client IP. Ignored when it names
    /// X-Forwarded-For or X-Real-Ip, which are managed separately.
    pub client_ip_header: String,

    /// Header set on TLS connections.
    pub tls_header: String,

    /// Value for `tls_header`.
    pub tls_header_value: String,

    /// When non-empty, this header is set to a fresh UUID v4 on every
    /// request before lookup.
    pub request_id_header: String,

    /// Regex over response Content-Type values that are gzip-compressed
    /// when the client accepts it. Empty disables compression.
    pub gzip_content_types: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_conn: 10_000,
            strategy: "rnd".to_string(),
            matcher: "prefix".to_string(),
            no_route_status: 404,
            no_route_html: String::new(),
            shutdown_wait_secs: 0,
            dial_timeout_secs: 30,
            response_header_timeout_secs: 0,
            keep_alive_timeout_secs: 0,
            flush_interval_ms: 1000,
            global_flush_interval_ms: 0,
            strip_path: false,
            local_ip: String::new(),
            client_ip_header: String::new(),
            tls_header: String::new(),
            tls_header_value: String::new(),
            request_id_header: String::new(),
            gzip_content_types: String::new(),
        }
    }
}

/// A single data-plane listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Bind address (e.g., "0.0.0.0:9999").
    pub addr: String,

    /// Protocol: "http", "https" or "tcp+sni".
    pub proto: String,

    /// Per-listener request read timeout in seconds. 0 disables.
    pub read_timeout_secs: u64,

    /// Per-listener response write timeout in seconds. 0 disables.
    pub write_timeout_secs: u64,

    /// Certificate source. Required for "https", forbidden otherwise.
    pub cert_source: Option<CertSource>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:9999".to_string(),
            proto: "http".to_string(),
            read_timeout_secs: 0,
            write_timeout_secs: 0,
            cert_source: None,
        }
    }
}

/// PEM certificate source for a TLS listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertSource {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Service registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backend kind: "consul", "file" or "static".
    pub backend: String,

    pub file: FileRegistryConfig,

    #[serde(rename = "static")]
    pub static_routes: StaticRegistryConfig,

    pub consul: ConsulConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: "consul".to_string(),
            file: FileRegistryConfig::default(),
            static_routes: StaticRegistryConfig::default(),
            consul: ConsulConfig::default(),
        }
    }
}

/// File registry: a route-command file on disk.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FileRegistryConfig {
    /// Path to the route-command file.
    pub path: String,

    /// Re-read interval in seconds. 0 reads the file once.
    pub poll_interval_secs: u64,
}

/// Static registry: a literal route-command list.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StaticRegistryConfig {
    /// Route commands, one per line.
    pub routes: String,
}

/// Consul registry driver.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// Agent address (host:port).
    pub addr: String,

    /// KV path holding the manual route-command overrides.
    pub kv_path: String,

    /// Tag prefix marking route advertisements on services.
    pub tag_prefix: String,

    /// Service name used when registering this proxy.
    pub service_name: String,

    /// Address registered for this proxy's health check
    /// (defaults to the admin address when empty).
    pub service_addr: String,

    /// Health check interval in seconds.
    pub check_interval_secs: u64,

    /// Health check timeout in seconds.
    pub check_timeout_secs: u64,

    /// Maximum wait for blocking queries in seconds.
    pub poll_wait_secs: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:8500".to_string(),
            kv_path: "switchyard/config".to_string(),
            tag_prefix: "urlprefix-".to_string(),
            service_name: "switchyard".to_string(),
            service_addr: String::new(),
            check_interval_secs: 1,
            check_timeout_secs: 3,
            poll_wait_secs: 30,
        }
    }
}

/// Metrics exposition configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus scrape endpoint.
    pub enabled: bool,

    /// Scrape endpoint bind address.
    pub addr: String,

    /// Prefix prepended to every metric name.
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9998".to_string(),
            prefix: String::new(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Admin bind address, separate from the data plane.
    pub addr: String,

    /// Dashboard title.
    pub title: String,

    /// Dashboard accent color.
    pub color: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9997".to_string(),
            title: "switchyard".to_string(),
            color: "light-green".to_string(),
        }
    }
}

/// Runtime sizing.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tokio worker threads. 0 uses the number of cores.
    pub worker_threads: usize,
}
