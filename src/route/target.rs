//! A single upstream destination.

use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnet::IpNet;
use url::Url;

/// A Target is one upstream destination of a route. Targets of the same
/// route share `(host, path)` and differ in destination and weight.
#[derive(Debug)]
pub struct Target {
    /// Name of the service the target belongs to.
    pub service: String,

    /// Tags of the service instance that advertised this target.
    pub tags: Vec<String>,

    /// Destination URL. The scheme selects the downstream transport
    /// (http, https, ws, wss, tcp, fcgi).
    pub url: Url,

    /// Weight assigned explicitly via the route command, or 0.
    pub fixed_weight: f64,

    /// Weight computed during table normalization. Per route these
    /// sum to 1 across all targets.
    pub weight: f64,

    /// Free-form options attached on route creation, kept verbatim so
    /// the table prints back to its command form.
    pub opts: BTreeMap<String, String>,

    /// Path prefix removed from the request before forwarding
    /// (from the `strip=` opt).
    pub strip_path: String,

    /// Outbound Host header directive: "dst" rewrites to the upstream
    /// host, any other non-empty value is used literally (from the
    /// `host=` opt).
    pub host: String,

    /// Redirect status code, or 0 when the target proxies.
    pub redirect_code: u16,

    /// Redirect location, may contain `$path` and `$query` tokens.
    pub redirect_url: String,

    /// Skip upstream certificate verification (from the
    /// `tlsskipverify=` opt).
    pub tls_skip_verify: bool,

    /// Source-network access predicate (from `allow=`/`deny=` opts).
    pub access: AccessRules,

    /// Metrics key for this target's latency histogram, stable across
    /// table rebuilds for an unchanged (service, host, path, upstream).
    pub timer_name: String,
}

impl Target {
    /// Build a target from its route-command pieces. Returns an error
    /// message when an opt value does not parse.
    pub fn new(
        service: &str,
        host: &str,
        path: &str,
        url: Url,
        fixed_weight: f64,
        tags: Vec<String>,
        opts: BTreeMap<String, String>,
        redirect: Option<(u16, Option<String>)>,
    ) -> Result<Self, String> {
        let strip_path = opts.get("strip").cloned().unwrap_or_default();
        let host_directive = opts.get("host").cloned().unwrap_or_default();
        let tls_skip_verify = opts.get("tlsskipverify").map(String::as_str) == Some("true");
        let access = AccessRules::parse(opts.get("allow"), opts.get("deny"))?;

        let (redirect_code, redirect_url) = match redirect {
            Some((code, dst)) => {
                let dst = dst.unwrap_or_else(|| url.to_string());
                (code, dst)
            }
            None => (0, String::new()),
        };

        let timer_name = timer_name(service, host, path, &url);

        Ok(Self {
            service: service.to_string(),
            tags,
            url,
            fixed_weight,
            weight: 0.0,
            opts,
            strip_path,
            host: host_directive,
            redirect_code,
            redirect_url,
            tls_skip_verify,
            access,
            timer_name,
        })
    }

    /// True when this target answers with a redirect instead of proxying.
    pub fn redirects(&self) -> bool {
        self.redirect_code != 0
    }

    /// Expand `$path` and `$query` tokens in the redirect location.
    pub fn redirect_location(&self, path: &str, raw_query: &str) -> String {
        self.redirect_url
            .replace("$path", path)
            .replace("$query", raw_query)
    }

    /// True when the source address may not use this target.
    pub fn access_denied(&self, remote: IpAddr) -> bool {
        self.access.denies(remote)
    }
}

/// Allow/deny lists of source networks. Opt values look like
/// `allow=ip:10.0.0.0/8,ip:192.168.1.0/24`.
#[derive(Debug, Default)]
pub struct AccessRules {
    allow: Vec<IpNet>,
    deny: Vec<IpNet>,
}

impl AccessRules {
    pub fn parse(allow: Option<&String>, deny: Option<&String>) -> Result<Self, String> {
        Ok(Self {
            allow: parse_nets(allow)?,
            deny: parse_nets(deny)?,
        })
    }

    /// An allow list denies everything not on it; a deny list denies
    /// exactly what is on it. With neither, everything is allowed.
    pub fn denies(&self, remote: IpAddr) -> bool {
        if !self.allow.is_empty() {
            return !self.allow.iter().any(|n| n.contains(&remote));
        }
        if !self.deny.is_empty() {
            return self.deny.iter().any(|n| n.contains(&remote));
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

fn parse_nets(spec: Option<&String>) -> Result<Vec<IpNet>, String> {
    let Some(spec) = spec else {
        return Ok(Vec::new());
    };
    let mut nets = Vec::new();
    for entry in spec.split(',') {
        let entry = entry.trim();
        let Some(cidr) = entry.strip_prefix("ip:") else {
            return Err(format!("invalid access spec {:?}, expected ip:<cidr>", entry));
        };
        let net: IpNet = cidr
            .parse()
            .map_err(|e| format!("invalid network {:?}: {}", cidr, e))?;
        nets.push(net);
    }
    Ok(nets)
}

/// Metric key `<service>.<host>.<path>.<upstream>` with characters that
/// would nest in a dotted hierarchy cleaned to underscores.
fn timer_name(service: &str, host: &str, path: &str, url: &Url) -> String {
    let upstream = match url.port() {
        Some(p) => format!("{}:{}", url.host_str().unwrap_or(""), p),
        None => url.host_str().unwrap_or("").to_string(),
    };
    format!(
        "{}.{}.{}.{}",
        clean(service),
        clean(host),
        clean(path),
        clean(&upstream)
    )
}

fn clean(s: &str) -> String {
    if s.is_empty() {
        return "_".to_string();
    }
    s.chars()
        .map(|c| match c {
            '.' | ':' | '/' => '_',
            c => c,
        })
        .collect()
}
