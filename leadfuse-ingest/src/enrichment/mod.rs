//! Enrichment provider boundary
//!
//! The engine treats enrichment as a best-effort, read-only input: any error
//! from a client degrades to "no snapshot" for that identity group.

pub mod http;

pub use http::HttpEnrichmentClient;

use crate::types::{EnrichmentSnapshot, NormalizedAddress};
use async_trait::async_trait;
use thiserror::Error;

/// Enrichment client errors
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("No provider data for {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Fetches third-party property bundles
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    /// Snapshot for the property at `identity`
    async fn fetch_snapshot(
        &self,
        identity: &NormalizedAddress,
    ) -> Result<EnrichmentSnapshot, EnrichmentError>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "enrichment"
    }
}
