//! Route matching strategies.
//!
//! # Responsibilities
//! - Decide whether a route path matches a request path
//! - Host matching is handled by the table's bucket lookup
//!
//! # Design Decisions
//! - Strategy is process-global and fixed at startup
//! - Matching is pure; tie-breaking comes from the stored route order
//!   (longest prefix first)

/// Path matching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Matcher {
    /// Route path is a prefix of the request path.
    #[default]
    Prefix,
    /// Route path is a shell pattern over the full request path.
    Glob,
}

impl Matcher {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name {
            "prefix" => Ok(Matcher::Prefix),
            "glob" => Ok(Matcher::Glob),
            other => Err(format!("unknown matcher {:?}", other)),
        }
    }

    /// True when `route_path` matches the request path.
    pub fn matches(&self, route_path: &str, request_path: &str) -> bool {
        match self {
            Matcher::Prefix => request_path.starts_with(route_path),
            Matcher::Glob => glob::Pattern::new(route_path)
                .map(|p| p.matches(request_path))
                .unwrap_or(false),
        }
    }
}
