//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → Config (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; routes change through the registry,
//!   not through config reloads
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{from_file, load, ConfigError};
pub use schema::{
    AdminConfig, CertSource, Config, ConsulConfig, FileRegistryConfig, ListenConfig,
    MetricsConfig, ProxyConfig, RegistryConfig, RuntimeConfig, StaticRegistryConfig,
};
