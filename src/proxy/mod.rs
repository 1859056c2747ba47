//! Traffic dispatching subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request
//!     → http.rs (lookup, access control, header rewrite)
//!     → headers.rs (Forwarded family, hop-by-hop stripping)
//!     → ws.rs | fcgi.rs | streaming forward
//!     → gzip.rs (optional response compression)
//!
//! tcp+sni connection
//!     → tcp_sni.rs (ClientHello peek, host lookup, splice)
//! ```

pub mod fcgi;
pub mod gzip;
pub mod headers;
pub mod http;
pub mod tcp_sni;
pub mod ws;

pub use http::{dispatch, ProxyState};
