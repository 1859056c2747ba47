//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup: load config → init observability → init registry
//!     → start rebuild loop → start admin → start listeners
//!
//! Shutdown: SIGTERM/SIGINT → deregister → drain (503 for
//!     shutdown_wait) → close listeners → exit
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
