//! leadfuse-ingest library interface
//!
//! Property identity resolution and fusion: raw observations from listing
//! sites, auction sites, record feeds and manual entry are normalized to an
//! identity key, grouped, and fused into one canonical record per property.

pub mod enrichment;
pub mod error;
pub mod fusion;
pub mod jsonl;
pub mod normalizer;
pub mod orchestrator;
pub mod store;
pub mod types;
pub mod utils;

pub use crate::error::{IngestError, IngestResult};
pub use crate::fusion::{fuse, ChangeReport, ConflictResolutionPolicy, FusionContext, FusionOutcome};
pub use crate::normalizer::{normalize, AddressNormalizer};
pub use crate::orchestrator::{BatchIngestor, BatchOutcome, IngestOptions, IngestSummary};
pub use crate::store::{CanonicalStore, MemoryStore, SqliteStore, StoreOptions};
