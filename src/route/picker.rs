//! Target picking strategies.

use std::sync::atomic::Ordering;

use rand::Rng;

use crate::route::route::Route;
use crate::route::target::Target;

/// Strategy that chooses one target from a route's weighted list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Picker {
    /// Uniform random sample over the weight buckets.
    #[default]
    Rnd,
    /// Round-robin over the weight buckets.
    Rr,
}

impl Picker {
    pub fn parse(name: &str) -> Result<Self, String> {
        match name {
            "rnd" => Ok(Picker::Rnd),
            "rr" => Ok(Picker::Rr),
            other => Err(format!("unknown strategy {:?}", other)),
        }
    }

    /// Pick a target. Returns None for a route without targets.
    pub fn pick<'a>(&self, route: &'a Route) -> Option<&'a Target> {
        let buckets = route.buckets();
        if buckets.is_empty() {
            return None;
        }
        let slot = match self {
            Picker::Rnd => rand::rng().random_range(0..buckets.len()),
            Picker::Rr => route.rr_cursor().fetch_add(1, Ordering::Relaxed) % buckets.len(),
        };
        route.targets.get(buckets[slot])
    }
}
