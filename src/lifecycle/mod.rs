//! Runtime orchestration: the [`PurchaseManager`], the per-transaction
//! driver it spawns, its configuration, and tracing setup.
//!
//! # Main Components
//!
//! - [`PurchaseManager`] - Owns the engine and exposes the public operations
//! - [`EngineConfig`] - Timeouts, initial validation servers, finish policy
//! - [`setup_tracing`] - Initializes the tracing/logging infrastructure

pub mod config;
mod driver;
mod engine;
pub mod manager;
pub mod tracing;

pub use config::{ConfigError, EngineConfig};
pub use manager::{EngineError, PurchaseManager};
pub use self::tracing::setup_tracing;
