//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, access log)
//!     → metrics.rs (request timers, status counters)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - One access-log event per request, emitted when the response body
//!   finishes streaming
//! - Metric handles resolve by name through the global registry, so
//!   histograms survive table swaps

pub mod logging;
pub mod metrics;
