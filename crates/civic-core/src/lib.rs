//! civic-core library.
//!
//! Data model, geospatial index, lifecycle state machine, gamification
//! ledger and the repository contracts the duplicate resolver builds on.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums per concern ([`error::EngineError`],
//!   [`error::StoreError`]); `anyhow` only at the SQLite/config file boundary.
//! - **Logging**: `tracing` macros (`info!` for state changes, `debug!` for
//!   no-ops, `warn!` for degraded collaborators).

pub mod classify;
pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod ledger;
pub mod lifecycle;
pub mod lock;
pub mod model;
pub mod store;
pub mod validate;
