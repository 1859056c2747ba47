//! The routing table.
//!
//! # Data Flow
//! ```text
//! route-command text
//!     → parser.rs (Command list)
//!     → Table::parse (apply commands, normalize weights)
//!     → SharedTable::publish (atomic swap)
//!
//! Request (host, path)
//!     → SharedTable::current (lock-free load)
//!     → Table::lookup (matcher scan, picker sample)
//!     → Target
//! ```
//!
//! # Design Decisions
//! - Tables are immutable once published; all mutation happens on a
//!   table under construction
//! - Host buckets keep routes sorted by path length descending so the
//!   first match is the longest prefix
//! - Readers hold an Arc for the request duration and never block

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use url::Url;

use crate::route::matcher::Matcher;
use crate::route::parser::{parse_annotated, Command, ParseError};
use crate::route::picker::Picker;
use crate::route::route::Route;
use crate::route::target::Target;

/// The full published set of routes for one generation of the
/// configuration: host → ordered routes. The empty host is the
/// wildcard bucket.
#[derive(Debug, Default)]
pub struct Table {
    hosts: HashMap<String, Vec<Route>>,
}

impl Table {
    /// Build a table from route-command text.
    pub fn parse(input: &str) -> Result<Table, ParseError> {
        let commands = parse_annotated(input)?;
        let mut table = Table::default();
        for (line, cmd) in commands {
            table.apply(cmd).map_err(|msg| ParseError { line, msg })?;
        }
        table.normalize();
        Ok(table)
    }

    fn apply(&mut self, cmd: Command) -> Result<(), String> {
        match cmd {
            Command::RouteAdd {
                service,
                host,
                path,
                dst,
                weight,
                tags,
                opts,
                redirect,
            } => {
                let target =
                    Target::new(&service, &host, &path, dst, weight, tags, opts, redirect)?;
                self.add_target(&host, &path, target);
                Ok(())
            }
            Command::RouteDel { service, src, dst } => {
                self.del_targets(&service, src.as_ref(), dst.as_ref());
                Ok(())
            }
            Command::RouteWeight {
                service,
                host,
                path,
                weight,
            } => {
                self.set_weight(&service, &host, &path, weight);
                Ok(())
            }
        }
    }

    fn add_target(&mut self, host: &str, path: &str, target: Target) {
        let routes = self.hosts.entry(host.to_string()).or_default();
        if let Some(route) = routes.iter_mut().find(|r| r.path == path) {
            route.upsert_target(target);
            return;
        }
        let mut route = Route::new(host, path);
        route.upsert_target(target);
        // Longest path first so the matcher scan stops at the most
        // specific route.
        let at = routes
            .iter()
            .position(|r| r.path.len() < path.len())
            .unwrap_or(routes.len());
        routes.insert(at, route);
    }

    fn del_targets(&mut self, service: &str, src: Option<&(String, String)>, dst: Option<&Url>) {
        match src {
            Some((host, path)) => {
                if let Some(routes) = self.hosts.get_mut(host) {
                    for route in routes.iter_mut().filter(|r| &r.path == path) {
                        route.remove_targets(service, dst);
                    }
                }
            }
            None => {
                for routes in self.hosts.values_mut() {
                    for route in routes.iter_mut() {
                        route.remove_targets(service, dst);
                    }
                }
            }
        }
        self.drop_empty();
    }

    fn set_weight(&mut self, service: &str, host: &str, path: &str, weight: f64) {
        if let Some(routes) = self.hosts.get_mut(host) {
            for route in routes.iter_mut().filter(|r| r.path == path) {
                route.set_service_weight(service, weight);
            }
        }
    }

    fn drop_empty(&mut self) {
        for routes in self.hosts.values_mut() {
            routes.retain(|r| !r.is_empty());
        }
        self.hosts.retain(|_, routes| !routes.is_empty());
    }

    fn normalize(&mut self) {
        for routes in self.hosts.values_mut() {
            for route in routes.iter_mut() {
                route.normalize();
            }
        }
    }

    /// Find a target for a request. The host bucket is consulted
    /// first, then the wildcard bucket; within a bucket the first
    /// matching route wins and the picker samples its targets.
    pub fn lookup(&self, host: &str, path: &str, matcher: Matcher, picker: Picker) -> Option<&Target> {
        let host = normalize_host(host);
        for bucket in [host.as_str(), ""] {
            if let Some(t) = self.match_bucket(bucket, path, matcher, picker) {
                return Some(t);
            }
        }
        None
    }

    fn match_bucket(
        &self,
        host: &str,
        path: &str,
        matcher: Matcher,
        picker: Picker,
    ) -> Option<&Target> {
        let routes = self.hosts.get(host)?;
        let route = routes.iter().find(|r| matcher.matches(&r.path, path))?;
        picker.pick(route)
    }

    /// Find a target for an opaque connection identified only by its
    /// SNI host. Only a `host/` route qualifies.
    pub fn lookup_host(&self, host: &str, picker: Picker) -> Option<&Target> {
        let host = normalize_host(host);
        let routes = self.hosts.get(&host)?;
        let route = routes.iter().find(|r| r.path == "/")?;
        picker.pick(route)
    }

    /// Number of routes across all host buckets.
    pub fn num_routes(&self) -> usize {
        self.hosts.values().map(Vec::len).sum()
    }

    /// Iterate host buckets in stable (sorted) order.
    pub fn iter_sorted(&self) -> impl Iterator<Item = (&String, &Vec<Route>)> {
        let mut hosts: Vec<_> = self.hosts.iter().collect();
        hosts.sort_by(|a, b| a.0.cmp(b.0));
        hosts.into_iter()
    }
}

fn normalize_host(host: &str) -> String {
    host.to_lowercase()
}

impl fmt::Display for Table {
    /// Prints the table in its canonical command form: hosts sorted,
    /// routes in match order. The output parses back to an equal table.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, routes) in self.iter_sorted() {
            for route in routes {
                write!(f, "{}", route)?;
            }
        }
        Ok(())
    }
}

/// The process-wide slot holding the current table.
///
/// A single writer (the rebuild loop) publishes; every request loads.
/// Readers get a consistent, fully constructed table and may hold the
/// reference for the whole request.
#[derive(Debug, Default)]
pub struct SharedTable {
    inner: ArcSwap<Table>,
}

impl SharedTable {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(Table::default()),
        }
    }

    /// Load the current table. Wait-free.
    pub fn current(&self) -> Arc<Table> {
        self.inner.load_full()
    }

    /// Atomically replace the published table.
    pub fn publish(&self, table: Table) {
        self.inner.store(Arc::new(table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(input: &str) -> Table {
        Table::parse(input).unwrap()
    }

    fn lookup<'a>(t: &'a Table, host: &str, path: &str) -> Option<&'a Target> {
        t.lookup(host, path, Matcher::Prefix, Picker::Rnd)
    }

    #[test]
    fn test_longest_prefix_wins() {
        let t = table(
            "route add a www.example.com/ http://h1/\n\
             route add b www.example.com/app http://h2/\n\
             route add c www.example.com/app/static http://h3/",
        );
        assert_eq!(lookup(&t, "www.example.com", "/app/static/x").unwrap().service, "c");
        assert_eq!(lookup(&t, "www.example.com", "/app/x").unwrap().service, "b");
        assert_eq!(lookup(&t, "www.example.com", "/other").unwrap().service, "a");
    }

    #[test]
    fn test_wildcard_bucket_catches_unknown_hosts() {
        let t = table(
            "route add a www.example.com/ http://h1/\n\
             route add b /fallback http://h2/",
        );
        assert_eq!(lookup(&t, "other.com", "/fallback/x").unwrap().service, "b");
        assert!(lookup(&t, "other.com", "/nope").is_none());
    }

    #[test]
    fn test_host_lookup_is_case_insensitive() {
        let t = table("route add a www.example.com/ http://h1/");
        assert!(lookup(&t, "WWW.EXAMPLE.COM", "/").is_some());
    }

    #[test]
    fn test_del_progressively_narrows() {
        let full = "route add a foo.com/ http://h1/\n\
                    route add a foo.com/sub http://h2/\n\
                    route add b foo.com/ http://h3/";

        // Widest: every route of the service goes.
        let mut t = table(&format!("{}\nroute del a", full));
        assert_eq!(t.num_routes(), 1);
        assert_eq!(lookup(&t, "foo.com", "/").unwrap().service, "b");

        // Narrowed to a source: the other route of the service stays.
        t = table(&format!("{}\nroute del a foo.com/sub", full));
        assert_eq!(lookup(&t, "foo.com", "/sub/x").unwrap().service, "a");
        assert!(t
            .hosts
            .get("foo.com")
            .map(|rs| rs.iter().all(|r| r.path != "/sub"))
            .unwrap_or(true));

        // Narrowed to a destination: only that target goes.
        t = table(&format!("{}\nroute del b foo.com/ http://h3/", full));
        assert_eq!(t.num_routes(), 2);
    }

    #[test]
    fn test_weight_command_applies_to_service_targets() {
        let t = table(
            "route add a foo.com/ http://h1/\n\
             route add b foo.com/ http://h2/\n\
             route weight a foo.com/ weight 0.9",
        );
        let routes = t.hosts.get("foo.com").unwrap();
        let a = routes[0].targets.iter().find(|t| t.service == "a").unwrap();
        let b = routes[0].targets.iter().find(|t| t.service == "b").unwrap();
        assert!((a.weight - 0.9).abs() < 1e-9);
        assert!((b.weight - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_add_is_ensure_exists() {
        let t = table(
            "route add a foo.com/ http://h1/\n\
             route add a foo.com/ http://h1/ weight 0.4",
        );
        let routes = t.hosts.get("foo.com").unwrap();
        assert_eq!(routes[0].targets.len(), 1);
        assert_eq!(routes[0].targets[0].fixed_weight, 0.4);
    }

    #[test]
    fn test_print_parse_round_trip() {
        let input = "route add a www.example.com/app http://h1:8080/ weight 0.25 tags \"x,y\" opts \"strip=/app\"\n\
                     route add b www.example.com/ http://h2/\n\
                     route add c /misc http://h3/\n\
                     route add d www.ex.com/old http://ignored/ redirect 301 /new";
        let once = table(input).to_string();
        let twice = table(&once).to_string();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_parse_error_keeps_line_info() {
        let err = Table::parse("route add a foo.com/ http://h1/\nroute add broken").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_shared_table_swaps_atomically() {
        let shared = SharedTable::new();
        assert_eq!(shared.current().num_routes(), 0);
        shared.publish(table("route add a / http://h1/"));
        assert_eq!(shared.current().num_routes(), 1);
    }

    #[test]
    fn test_concurrent_publish_and_lookup() {
        let shared = Arc::new(SharedTable::new());
        shared.publish(table("route add a / http://h1/"));

        let writer = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for i in 0..10_000 {
                    let url = if i % 2 == 0 { "http://h1/" } else { "http://h2/" };
                    shared.publish(table(&format!("route add a / {}", url)));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        let t = shared.current();
                        let target = lookup(&t, "any.host", "/x").expect("table never empty");
                        let url = target.url.as_str();
                        assert!(url == "http://h1/" || url == "http://h2/", "got {}", url);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn test_sni_host_lookup_requires_root_route() {
        let t = table(
            "route add a example.com/ tcp://10.0.0.1:443\n\
             route add b other.com/app http://h1/",
        );
        assert!(t.lookup_host("example.com", Picker::Rnd).is_some());
        assert!(t.lookup_host("other.com", Picker::Rnd).is_none());
        assert!(t.lookup_host("unknown.com", Picker::Rnd).is_none());
    }
}
