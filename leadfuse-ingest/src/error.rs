//! Error types for leadfuse-ingest
//!
//! Only `Common` is fatal to a caller. The other kinds are isolated to a
//! single observation or identity group and are accumulated into the batch
//! summary instead of aborting ingestion.

use thiserror::Error;

/// Ingestion error
#[derive(Debug, Error)]
pub enum IngestError {
    /// No street line could be isolated from the address text
    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    /// Enrichment provider failed or timed out; fusion proceeds without it
    #[error("Enrichment unavailable for {identity_key}: {reason}")]
    EnrichmentUnavailable { identity_key: String, reason: String },

    /// Candidate rejected by the plausibility filter
    #[error("Implausible value for {field}: {detail}")]
    ImplausibleValue { field: String, detail: String },

    /// Persisting one group failed
    #[error("Store write failed for {identity_key}: {source}")]
    StoreWriteFailure {
        identity_key: String,
        #[source]
        source: leadfuse_common::Error,
    },

    /// leadfuse-common error
    #[error(transparent)]
    Common(#[from] leadfuse_common::Error),
}

impl IngestError {
    /// Short machine-readable kind used in summaries and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedAddress(_) => "malformed_address",
            Self::EnrichmentUnavailable { .. } => "enrichment_unavailable",
            Self::ImplausibleValue { .. } => "implausible_value",
            Self::StoreWriteFailure { .. } => "store_write_failure",
            Self::Common(_) => "internal",
        }
    }
}

/// Result type for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failure_keeps_source() {
        use std::error::Error as _;

        let err = IngestError::StoreWriteFailure {
            identity_key: "k1".to_string(),
            source: leadfuse_common::Error::Internal("disk full".to_string()),
        };
        assert_eq!(err.kind(), "store_write_failure");
        assert!(err.to_string().contains("k1"));
        assert!(err.source().is_some());
    }
}
