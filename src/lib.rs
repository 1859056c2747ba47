//! switchyard — a dynamic reverse proxy and traffic router.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌───────────────────────────────────────────────┐
//!                       │                  SWITCHYARD                   │
//!                       │                                               │
//!   Client Request      │  ┌─────────┐   ┌──────────┐   ┌────────────┐  │
//!   ────────────────────┼─▶│   net   │──▶│  proxy   │──▶│   route    │  │
//!                       │  │listeners│   │dispatcher│   │   table    │  │
//!                       │  └─────────┘   └────┬─────┘   └─────▲──────┘  │
//!                       │                     │               │ publish │
//!                       │                     ▼               │         │
//!   Client Response     │               ┌──────────┐    ┌─────┴──────┐  │
//!   ◀───────────────────┼───────────────│ upstream │    │  registry  │◀─┼── consul / file
//!                       │               │  pools   │    │watch+fold  │  │    / static
//!                       │               └──────────┘    └────────────┘  │
//!                       │                                               │
//!                       │  ┌─────────────────────────────────────────┐  │
//!                       │  │ config · observability · admin ·        │  │
//!                       │  │ lifecycle                               │  │
//!                       │  └─────────────────────────────────────────┘  │
//!                       └───────────────────────────────────────────────┘
//! ```
//!
//! Backends advertise URL-prefix routes through registry tags; the
//! rebuild loop folds discovery snapshots and operator overrides into
//! immutable routing tables that are swapped in atomically. The
//! dispatcher maps each request through the current table and forwards
//! it over the transport its target calls for: reverse proxy,
//! websocket, server-sent events, FastCGI, or a raw TCP splice keyed
//! on SNI.

// Core subsystems
pub mod config;
pub mod net;
pub mod proxy;
pub mod registry;
pub mod route;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use config::Config;
pub use lifecycle::Shutdown;
