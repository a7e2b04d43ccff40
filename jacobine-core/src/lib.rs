//! Jacobine Core - Foundation crate for the Jacobine analysis pipeline
//!
//! This crate provides the shared functionality used by every pipeline
//! process, producer and consumer alike:
//!
//! # Modules
//!
//! - [`config`] — Strongly-typed configuration with YAML and environment variable support
//! - [`domain`] — Work records, wire envelopes, and stage identifiers
//! - [`infrastructure`] — Database gateway, HTTP fetcher, and process runner
//! - [`logging`] — Structured logging with tracing
//!
//! # Architecture
//!
//! ```text
//! jacobine-core/
//! ├── domain/           # Records and message envelopes
//! ├── infrastructure/   # External integrations
//! │   ├── database/     # MySQL gateway with reconnect-once discipline
//! │   ├── http/         # Buffered GET and streaming download
//! │   └── process/      # Child process supervision with timeouts
//! ├── config/           # Configuration management
//! └── logging.rs        # tracing subscriber setup
//! ```
//!
//! # Configuration
//!
//! ```rust,ignore
//! use jacobine_core::Config;
//!
//! let config = Config::load(None)?;
//! ```
//!
//! Environment variables use the `JACOBINE__` prefix with double underscore
//! separators:
//!
//! ```bash
//! JACOBINE__RABBITMQ__HOST=broker.internal
//! JACOBINE__MYSQL__PORT=3307
//! ```

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;

pub use config::Config;
pub use logging::init_tracing;
