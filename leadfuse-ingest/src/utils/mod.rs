//! Utility modules for leadfuse-ingest

pub mod db_retry;

pub use db_retry::retry_on_lock;
