//! A route and its weighted target list.

use std::fmt;
use std::sync::atomic::AtomicUsize;

use url::Url;

use crate::route::target::Target;

/// Number of picking buckets per route. Effective weights are quantized
/// to 1/BUCKETS.
const BUCKETS: usize = 1000;

/// A Route maps `(host, path)` to a list of weighted targets.
///
/// Routes are immutable once their table is published. The round-robin
/// cursor is the single exception; it is a relaxed atomic whose drift
/// under concurrency is acceptable and never read for correctness.
#[derive(Debug)]
pub struct Route {
    /// Lower-cased host, empty for the wildcard bucket.
    pub host: String,

    /// URL-path prefix, or a shell pattern under the glob matcher.
    pub path: String,

    /// Weighted targets sharing this (host, path).
    pub targets: Vec<Target>,

    /// Target indexes repeated proportionally to effective weight.
    buckets: Vec<usize>,

    /// Round-robin cursor.
    rr_cursor: AtomicUsize,
}

impl Route {
    pub fn new(host: &str, path: &str) -> Self {
        Self {
            host: host.to_lowercase(),
            path: path.to_string(),
            targets: Vec::new(),
            buckets: Vec::new(),
            rr_cursor: AtomicUsize::new(0),
        }
    }

    /// Add a target, or refresh the attributes of an existing one with
    /// the same service and destination.
    pub fn upsert_target(&mut self, target: Target) {
        if let Some(existing) = self
            .targets
            .iter_mut()
            .find(|t| t.service == target.service && t.url == target.url)
        {
            *existing = target;
        } else {
            self.targets.push(target);
        }
    }

    /// Remove targets of `service`, optionally narrowed to one
    /// destination URL.
    pub fn remove_targets(&mut self, service: &str, dst: Option<&Url>) {
        self.targets
            .retain(|t| t.service != service || dst.is_some_and(|u| &t.url != u));
    }

    /// Assign an explicit fractional weight to all targets of one
    /// service on this route.
    pub fn set_service_weight(&mut self, service: &str, weight: f64) {
        for t in &mut self.targets {
            if t.service == service {
                t.fixed_weight = weight;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Recompute effective weights and the picking buckets.
    ///
    /// Fixed weights are honored as long as they fit into the unit
    /// budget; whatever remains is split equally across targets without
    /// a fixed weight.
    pub fn normalize(&mut self) {
        let n = self.targets.len();
        if n == 0 {
            self.buckets.clear();
            return;
        }

        let fixed_sum: f64 = self
            .targets
            .iter()
            .filter(|t| t.fixed_weight > 0.0)
            .map(|t| t.fixed_weight)
            .sum();
        let n_fixed = self.targets.iter().filter(|t| t.fixed_weight > 0.0).count();
        let n_free = n - n_fixed;

        if fixed_sum >= 1.0 || n_free == 0 {
            // Over-committed or fully fixed: renormalize the fixed weights.
            for t in &mut self.targets {
                t.weight = t.fixed_weight / fixed_sum;
            }
        } else if fixed_sum > 0.0 {
            let free_share = (1.0 - fixed_sum) / n_free as f64;
            for t in &mut self.targets {
                t.weight = if t.fixed_weight > 0.0 {
                    t.fixed_weight
                } else {
                    free_share
                };
            }
        } else {
            let share = 1.0 / n as f64;
            for t in &mut self.targets {
                t.weight = share;
            }
        }

        self.rebuild_buckets();
    }

    fn rebuild_buckets(&mut self) {
        let n = self.targets.len();
        let mut counts: Vec<usize> = self
            .targets
            .iter()
            .map(|t| (t.weight * BUCKETS as f64).round() as usize)
            .collect();

        // Rounding drift lands on the last target.
        let total: usize = counts.iter().sum();
        if total < BUCKETS {
            counts[n - 1] += BUCKETS - total;
        } else if total > BUCKETS {
            let excess = total - BUCKETS;
            counts[n - 1] = counts[n - 1].saturating_sub(excess);
        }

        self.buckets = counts
            .iter()
            .enumerate()
            .flat_map(|(i, &c)| std::iter::repeat(i).take(c))
            .collect();
    }

    pub(crate) fn buckets(&self) -> &[usize] {
        &self.buckets
    }

    pub(crate) fn rr_cursor(&self) -> &AtomicUsize {
        &self.rr_cursor
    }
}

impl fmt::Display for Route {
    /// Prints the route as its `route add` commands, one per target.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.targets {
            write!(f, "route add {} {}{} {}", t.service, self.host, self.path, t.url)?;
            if t.redirects() {
                write!(f, " redirect {}", t.redirect_code)?;
                if t.redirect_url != t.url.to_string() {
                    write!(f, " {}", t.redirect_url)?;
                }
            }
            if t.fixed_weight > 0.0 {
                write!(f, " weight {}", t.fixed_weight)?;
            }
            if !t.tags.is_empty() {
                write!(f, " tags \"{}\"", t.tags.join(","))?;
            }
            if !t.opts.is_empty() {
                let opts: Vec<String> =
                    t.opts.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, " opts \"{}\"", opts.join(" "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn add(route: &mut Route, service: &str, url: &str, weight: f64) {
        let t = Target::new(
            service,
            &route.host.clone(),
            &route.path.clone(),
            Url::parse(url).unwrap(),
            weight,
            vec![],
            BTreeMap::new(),
            None,
        )
        .unwrap();
        route.upsert_target(t);
    }

    fn weights(route: &Route) -> Vec<f64> {
        route.targets.iter().map(|t| t.weight).collect()
    }

    #[test]
    fn test_equal_distribution_without_fixed_weights() {
        let mut r = Route::new("www.example.com", "/");
        add(&mut r, "a", "http://h1/", 0.0);
        add(&mut r, "b", "http://h2/", 0.0);
        add(&mut r, "c", "http://h3/", 0.0);
        add(&mut r, "d", "http://h4/", 0.0);
        r.normalize();
        assert_eq!(weights(&r), vec![0.25; 4]);
        assert_eq!(r.buckets().len(), 1000);
    }

    #[test]
    fn test_fixed_weights_leave_remainder_to_free_targets() {
        let mut r = Route::new("www.example.com", "/");
        add(&mut r, "a", "http://h1/", 0.5);
        add(&mut r, "b", "http://h2/", 0.0);
        add(&mut r, "c", "http://h3/", 0.0);
        r.normalize();
        assert_eq!(weights(&r), vec![0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_overcommitted_fixed_weights_renormalize() {
        let mut r = Route::new("www.example.com", "/");
        add(&mut r, "a", "http://h1/", 3.0);
        add(&mut r, "b", "http://h2/", 1.0);
        add(&mut r, "c", "http://h3/", 0.0);
        r.normalize();
        let w = weights(&r);
        assert!((w[0] - 0.75).abs() < 1e-9);
        assert!((w[1] - 0.25).abs() < 1e-9);
        assert_eq!(w[2], 0.0);
    }

    #[test]
    fn test_bucket_remainder_goes_to_last_target() {
        let mut r = Route::new("www.example.com", "/");
        add(&mut r, "a", "http://h1/", 0.0);
        add(&mut r, "b", "http://h2/", 0.0);
        add(&mut r, "c", "http://h3/", 0.0);
        r.normalize();
        let buckets = r.buckets();
        assert_eq!(buckets.len(), 1000);
        assert_eq!(buckets.iter().filter(|&&i| i == 0).count(), 333);
        assert_eq!(buckets.iter().filter(|&&i| i == 2).count(), 334);
    }

    #[test]
    fn test_upsert_refreshes_existing_target() {
        let mut r = Route::new("", "/");
        add(&mut r, "a", "http://h1/", 0.0);
        add(&mut r, "a", "http://h1/", 0.8);
        assert_eq!(r.targets.len(), 1);
        assert_eq!(r.targets[0].fixed_weight, 0.8);
    }

    #[test]
    fn test_remove_targets_narrowed_by_url() {
        let mut r = Route::new("", "/");
        add(&mut r, "a", "http://h1/", 0.0);
        add(&mut r, "a", "http://h2/", 0.0);
        r.remove_targets("a", Some(&Url::parse("http://h1/").unwrap()));
        assert_eq!(r.targets.len(), 1);
        assert_eq!(r.targets[0].url.as_str(), "http://h2/");
        r.remove_targets("a", None);
        assert!(r.is_empty());
    }
}
