//! # leadfuse common library
//!
//! Shared code for the leadfuse crates:
//! - Error type
//! - TOML bootstrap configuration
//! - Tracing setup
//! - SQLite connection setup
//! - Ingestion event bus

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
