//! Canonical store
//!
//! Narrow persistence boundary for canonical records and their change-report
//! history. The store never merges; fusion produces the record and the store
//! overwrites it. A per-key async mutex serializes writers that touch the same
//! identity key from overlapping batches.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::fusion::ChangeReport;
use crate::types::{CanonicalPropertyRecord, IdentityKey, StructuredAddress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadfuse_common::config::IngestConfig;
use leadfuse_common::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// Idle lock entries are pruned once the map grows past this size
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Retention and retry settings shared by store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Change reports kept per identity key
    pub history_limit: usize,
    /// Total time a write may spend retrying lock contention
    pub max_lock_wait_ms: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for StoreOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            history_limit: config.change_history_limit,
            max_lock_wait_ms: config.max_lock_wait_ms,
        }
    }
}

/// Per-identity-key async mutexes
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<IdentityKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`; released when the guard drops
    pub async fn lock(&self, key: &IdentityKey) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > LOCK_PRUNE_THRESHOLD {
                // Only the map holds these, so nobody is waiting on them
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persistence for canonical records
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    /// Record for `key`, if one was ever stored
    async fn get(&self, key: &IdentityKey) -> Result<Option<CanonicalPropertyRecord>>;

    /// Full overwrite; writing the same record twice leaves the same state
    async fn put(&self, record: &CanonicalPropertyRecord) -> Result<()>;

    /// All records ordered by identity key
    async fn list(&self) -> Result<Vec<CanonicalPropertyRecord>>;

    /// Append to the key's history, keeping only the most recent reports
    async fn append_change_report(&self, report: &ChangeReport) -> Result<()>;

    /// Retained reports for `key`, oldest first
    async fn change_history(&self, key: &IdentityKey) -> Result<Vec<ChangeReport>>;

    fn key_locks(&self) -> &KeyLocks;

    /// Existing record or a fresh empty one (`observation_count = 0`)
    ///
    /// The fresh record is not persisted until `put`.
    async fn get_or_create(
        &self,
        key: &IdentityKey,
        address: &StructuredAddress,
        now: DateTime<Utc>,
    ) -> Result<CanonicalPropertyRecord> {
        Ok(match self.get(key).await? {
            Some(record) => record,
            None => CanonicalPropertyRecord::new_empty(key.clone(), address.clone(), now),
        })
    }

    /// Serialize read-fuse-write cycles on one key
    async fn lock_key(&self, key: &IdentityKey) -> OwnedMutexGuard<()> {
        self.key_locks().lock(key).await
    }
}
