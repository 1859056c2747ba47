//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! registry snapshots (route-command text)
//!     → parser.rs (command list)
//!     → table.rs (apply, normalize, publish atomically)
//!
//! Incoming request (host, path)
//!     → table.rs (host bucket, then wildcard)
//!     → matcher.rs (prefix or glob scan, longest path first)
//!     → picker.rs (rnd or rr over weight buckets)
//!     → target.rs (destination, rewrite directives, access rules)
//! ```
//!
//! # Design Decisions
//! - Tables are immutable values behind an atomic swap; no locks on
//!   the request path
//! - Matcher and picker strategies are fixed at startup
//! - Weight buckets quantize effective weights to 1/1000

pub mod matcher;
pub mod parser;
pub mod picker;
pub mod route;
pub mod table;
pub mod target;

pub use matcher::Matcher;
pub use parser::{parse_commands, Command, ParseError};
pub use picker::Picker;
pub use route::Route;
pub use table::{SharedTable, Table};
pub use target::Target;
