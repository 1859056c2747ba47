//! Outbound header rewriting.
//!
//! # Responsibilities
//! - Add/update the `Forwarded` (RFC 7239) header
//! - Add X-Forwarded-Proto, X-Real-Ip and X-Forwarded-For
//! - Set the configured client-IP and TLS marker headers
//! - Strip hop-by-hop headers before forwarding

use std::net::IpAddr;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::ProxyConfig;

/// Headers that are meaningful only for a single transport link and
/// must not travel to the upstream.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Rewrite `headers` in place for forwarding a request that arrived
/// from `remote` on a connection where TLS is `tls`.
pub fn add_headers(headers: &mut HeaderMap, cfg: &ProxyConfig, remote: IpAddr, tls: bool) {
    let remote_ip = remote.to_string();

    // The configurable client-IP header, unless it names one of the
    // headers that are managed below.
    if !cfg.client_ip_header.is_empty()
        && !cfg.client_ip_header.eq_ignore_ascii_case("X-Forwarded-For")
        && !cfg.client_ip_header.eq_ignore_ascii_case("X-Real-Ip")
    {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(cfg.client_ip_header.as_str()),
            HeaderValue::try_from(remote_ip.as_str()),
        ) {
            headers.insert(name, value);
        }
    }

    if !headers.contains_key("x-real-ip") {
        if let Ok(value) = HeaderValue::try_from(remote_ip.as_str()) {
            headers.insert("x-real-ip", value);
        }
    }

    let proto = if tls { "https" } else { "http" };
    if !headers.contains_key("x-forwarded-proto") {
        headers.insert("x-forwarded-proto", HeaderValue::from_static(proto));
    }

    // Assemble or augment the RFC 7239 Forwarded header.
    let mut fwd = match headers.get("forwarded").and_then(|v| v.to_str().ok()) {
        Some(existing) => existing.to_string(),
        None => format!("for={}; proto={}", remote_ip, proto),
    };
    if !cfg.local_ip.is_empty() {
        fwd.push_str("; by=");
        fwd.push_str(&cfg.local_ip);
    }
    if let Ok(value) = HeaderValue::try_from(fwd) {
        headers.insert("forwarded", value);
    }

    // Append to X-Forwarded-For; an upstream hop may already have
    // contributed entries.
    let xff = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, remote_ip),
        None => remote_ip.clone(),
    };
    if let Ok(value) = HeaderValue::try_from(xff) {
        headers.insert("x-forwarded-for", value);
    }

    if !cfg.tls_header.is_empty() && tls {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(cfg.tls_header.as_str()),
            HeaderValue::try_from(cfg.tls_header_value.as_str()),
        ) {
            headers.insert(name, value);
        }
    }
}

/// Remove hop-by-hop headers, including everything named by the
/// Connection header itself.
pub fn strip_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    for name in named {
        headers.remove(name.as_str());
    }
}

/// Strip `prefix` from `path` when it matches on a path-segment
/// boundary: `/svc` strips `/svc/x` but leaves `/svcx` alone.
pub fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return path;
    }
    match path.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> IpAddr {
        "2.2.2.2".parse().unwrap()
    }

    #[test]
    fn test_x_forwarded_for_appends() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_static("3.3.3.3"));
        add_headers(&mut h, &ProxyConfig::default(), remote(), false);
        assert_eq!(h.get("x-forwarded-for").unwrap(), "3.3.3.3, 2.2.2.2");
    }

    #[test]
    fn test_x_real_ip_not_overwritten() {
        let mut h = HeaderMap::new();
        h.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        add_headers(&mut h, &ProxyConfig::default(), remote(), false);
        assert_eq!(h.get("x-real-ip").unwrap(), "9.9.9.9");
    }

    #[test]
    fn test_forwarded_is_built_with_proto_and_by() {
        let mut h = HeaderMap::new();
        let cfg = ProxyConfig {
            local_ip: "1.1.1.1".to_string(),
            ..ProxyConfig::default()
        };
        add_headers(&mut h, &cfg, remote(), true);
        assert_eq!(
            h.get("forwarded").unwrap(),
            "for=2.2.2.2; proto=https; by=1.1.1.1"
        );
        assert_eq!(h.get("x-forwarded-proto").unwrap(), "https");
    }

    #[test]
    fn test_client_ip_header_skips_managed_names() {
        let mut h = HeaderMap::new();
        let cfg = ProxyConfig {
            client_ip_header: "X-Forwarded-For".to_string(),
            ..ProxyConfig::default()
        };
        add_headers(&mut h, &cfg, remote(), false);
        // Managed append still happened exactly once.
        assert_eq!(h.get("x-forwarded-for").unwrap(), "2.2.2.2");
    }

    #[test]
    fn test_tls_header_only_on_tls() {
        let cfg = ProxyConfig {
            tls_header: "X-Tls".to_string(),
            tls_header_value: "on".to_string(),
            ..ProxyConfig::default()
        };
        let mut h = HeaderMap::new();
        add_headers(&mut h, &cfg, remote(), false);
        assert!(h.get("x-tls").is_none());
        add_headers(&mut h, &cfg, remote(), true);
        assert_eq!(h.get("x-tls").unwrap(), "on");
    }

    #[test]
    fn test_hop_headers_are_stripped() {
        let mut h = HeaderMap::new();
        h.insert("connection", HeaderValue::from_static("x-custom-hop"));
        h.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        h.insert("x-custom-hop", HeaderValue::from_static("1"));
        h.insert("x-keep", HeaderValue::from_static("1"));
        strip_hop_headers(&mut h);
        assert!(h.get("connection").is_none());
        assert!(h.get("transfer-encoding").is_none());
        assert!(h.get("x-custom-hop").is_none());
        assert!(h.get("x-keep").is_some());
    }

    #[test]
    fn test_strip_path_prefix_boundary() {
        assert_eq!(strip_path_prefix("/svc/x", "/svc"), "/x");
        assert_eq!(strip_path_prefix("/svc", "/svc"), "/");
        assert_eq!(strip_path_prefix("/svcx", "/svc"), "/svcx");
        assert_eq!(strip_path_prefix("/x", ""), "/x");
    }
}
