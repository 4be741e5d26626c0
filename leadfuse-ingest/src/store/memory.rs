//! In-memory canonical store for tests and dry runs

use super::{CanonicalStore, KeyLocks, StoreOptions};
use crate::fusion::ChangeReport;
use crate::types::{CanonicalPropertyRecord, IdentityKey};
use async_trait::async_trait;
use leadfuse_common::Result;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<IdentityKey, CanonicalPropertyRecord>>,
    history: RwLock<BTreeMap<IdentityKey, VecDeque<ChangeReport>>>,
    options: StoreOptions,
    locks: KeyLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CanonicalStore for MemoryStore {
    async fn get(&self, key: &IdentityKey) -> Result<Option<CanonicalPropertyRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, record: &CanonicalPropertyRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.identity_key.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CanonicalPropertyRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn append_change_report(&self, report: &ChangeReport) -> Result<()> {
        let mut history = self.history.write().await;
        let entries = history.entry(report.identity_key.clone()).or_default();
        entries.push_back(report.clone());
        while entries.len() > self.options.history_limit {
            entries.pop_front();
        }
        Ok(())
    }

    async fn change_history(&self, key: &IdentityKey) -> Result<Vec<ChangeReport>> {
        Ok(self
            .history
            .read()
            .await
            .get(key)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn key_locks(&self) -> &KeyLocks {
        &self.locks
    }
}
