//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! registry backend (consul / file / static)
//!     → watch_services()  stream of complete services snapshots
//!     → watch_manual()    stream of complete operator overrides
//!     → watch.rs          fold latest of each, manual appended last
//!     → route::Table::parse → SharedTable::publish
//! ```
//!
//! # Design Decisions
//! - Snapshots are complete route-command texts, never diffs
//! - A broken backend stalls its stream; the rebuild loop keeps
//!   serving the last good table
//! - Registration keeps itself alive: the consul driver re-registers
//!   whenever the agent loses the service

pub mod consul;
pub mod file;
pub mod static_routes;
pub mod watch;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::config::Config;

/// Error type for registry backends.
#[derive(Debug)]
pub enum RegistryError {
    /// The configuration names an unknown backend.
    UnknownBackend(String),
    /// The backend could not be reached or rejected a request.
    Backend(String),
    Io(std::io::Error),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownBackend(name) => write!(f, "unknown registry backend {:?}", name),
            RegistryError::Backend(msg) => write!(f, "registry backend error: {}", msg),
            RegistryError::Io(e) => write!(f, "registry IO error: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

/// A registry backend. Both watch channels emit complete snapshots in
/// the route-command language; emitting the latest value again is
/// harmless since the rebuild loop deduplicates.
pub trait Backend: Send + Sync {
    /// Stream of services snapshots derived from discovery state.
    fn watch_services(&self) -> mpsc::Receiver<String>;

    /// Stream of operator-maintained override snapshots.
    fn watch_manual(&self) -> mpsc::Receiver<String>;

    /// Register this proxy with the registry, if the backend supports it.
    fn register(&self) -> BoxFuture<'_, Result<(), RegistryError>> {
        Box::pin(async { Ok(()) })
    }

    /// Remove this proxy from the registry.
    fn deregister(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Construct the backend named by the configuration.
pub fn new_backend(cfg: &Config) -> Result<Arc<dyn Backend>, RegistryError> {
    match cfg.registry.backend.as_str() {
        "file" => Ok(Arc::new(file::FileBackend::new(cfg.registry.file.clone()))),
        "static" => Ok(Arc::new(static_routes::StaticBackend::new(
            cfg.registry.static_routes.routes.clone(),
        ))),
        "consul" => Ok(Arc::new(consul::ConsulBackend::new(
            cfg.registry.consul.clone(),
            cfg.admin.addr.clone(),
        ))),
        other => Err(RegistryError::UnknownBackend(other.to_string())),
    }
}
