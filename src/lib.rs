//! Jacobine - Distributed analysis pipeline for project release artifacts
//!
//! This is the binary crate: the CLI dispatcher and the wiring that turns
//! configuration into a running producer or stage consumer.
//!
//! The pipeline itself lives in the member crates:
//!
//! - `jacobine-core` — configuration, domain model, and the database /
//!   HTTP / process gateways
//! - `jacobine-queue` — broker client and the consumer runtime
//! - `jacobine-stages` — the stage handlers and the seed producer

pub mod cli;

pub use jacobine_core::{Config, init_tracing};

// Re-export for convenience
pub use jacobine_core;
pub use jacobine_queue;
pub use jacobine_stages;
