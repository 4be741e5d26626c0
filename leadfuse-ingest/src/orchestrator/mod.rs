//! Batch ingestion orchestrator
//!
//! Normalizes a batch of raw observations, groups them by identity key and
//! fuses each group into its canonical record. Groups run concurrently up to
//! `max_concurrent_groups`; within a group the steps are strictly sequential:
//! lock key → load → enrich → fuse → persist.
//!
//! Failures stay local. A malformed address skips one observation, an
//! enrichment failure degrades one group to fusion without a snapshot, and a
//! store failure fails one group. Values dropped by the plausibility filter are
//! listed per group. The batch always completes with a summary.

use crate::enrichment::EnrichmentClient;
use crate::error::IngestError;
use crate::fusion::{self, ChangeReport, ConflictResolutionPolicy, FusionContext};
use crate::normalizer::AddressNormalizer;
use crate::store::CanonicalStore;
use crate::types::{
    CanonicalPropertyRecord, EnrichmentSnapshot, IdentityKey, NormalizedAddress,
    RawPropertyObservation,
};
use futures::stream::{self, StreamExt};
use leadfuse_common::config::{EnrichmentConfig, IngestConfig};
use leadfuse_common::events::{EventBus, IngestEvent};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Tunables for one ingestor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Identity groups processed at once
    pub max_concurrent_groups: usize,
    /// Upper bound on one enrichment call, including rate-limiter wait
    pub enrichment_timeout: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default(), &EnrichmentConfig::default())
    }
}

impl IngestOptions {
    pub fn from_config(ingest: &IngestConfig, enrichment: &EnrichmentConfig) -> Self {
        Self {
            max_concurrent_groups: ingest.max_concurrent_groups.max(1),
            enrichment_timeout: leadfuse_common::time::millis_to_duration(enrichment.timeout_ms),
        }
    }
}

/// Per-item problem reported back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_key: Option<IdentityKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_index: Option<usize>,
    pub kind: String,
    pub error: String,
}

impl IngestIssue {
    fn for_observation(index: usize, err: &IngestError) -> Self {
        Self {
            identity_key: None,
            observation_index: Some(index),
            kind: err.kind().to_string(),
            error: err.to_string(),
        }
    }

    fn for_group(key: &IdentityKey, err: &IngestError) -> Self {
        Self {
            identity_key: Some(key.clone()),
            observation_index: None,
            kind: err.kind().to_string(),
            error: err.to_string(),
        }
    }
}

/// Counts and details for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub batch_id: Uuid,
    /// Groups fused and persisted
    pub processed: usize,
    /// Observations rejected before grouping
    pub skipped: usize,
    /// Groups whose store access failed
    pub failed: usize,
    /// Groups fused without enrichment after a provider failure
    pub enrichment_degraded: usize,
    /// Candidates dropped by the plausibility filter
    pub implausible_rejections: usize,
    pub errors: Vec<IngestIssue>,
}

/// Result of [`BatchIngestor::ingest_batch`]
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Updated canonical records, ordered by identity key
    pub records: Vec<CanonicalPropertyRecord>,
    /// One change report per processed group, same order as `records`
    pub reports: Vec<ChangeReport>,
    pub summary: IngestSummary,
}

/// Observations sharing one identity key, in input order
struct IdentityGroup {
    identity: NormalizedAddress,
    observations: Vec<RawPropertyObservation>,
}

enum GroupResult {
    Fused {
        record: Box<CanonicalPropertyRecord>,
        report: Box<ChangeReport>,
        enrichment_issue: Option<IngestIssue>,
    },
    Failed(IngestIssue),
}

pub struct BatchIngestor {
    store: Arc<dyn CanonicalStore>,
    enrichment: Option<Arc<dyn EnrichmentClient>>,
    normalizer: Arc<AddressNormalizer>,
    policy: Arc<ConflictResolutionPolicy>,
    options: IngestOptions,
    event_bus: Option<EventBus>,
}

impl BatchIngestor {
    pub fn new(
        store: Arc<dyn CanonicalStore>,
        normalizer: Arc<AddressNormalizer>,
        policy: Arc<ConflictResolutionPolicy>,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            enrichment: None,
            normalizer,
            policy,
            options,
            event_bus: None,
        }
    }

    pub fn with_enrichment(mut self, client: Arc<dyn EnrichmentClient>) -> Self {
        self.enrichment = Some(client);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn store(&self) -> &Arc<dyn CanonicalStore> {
        &self.store
    }

    fn emit(&self, event: IngestEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }

    /// Ingest one batch of observations
    pub async fn ingest_batch(&self, observations: Vec<RawPropertyObservation>) -> BatchOutcome {
        let batch_id = Uuid::new_v4();
        let observation_total = observations.len();
        let mut summary = IngestSummary {
            batch_id,
            ..IngestSummary::default()
        };

        // Group by identity key; BTreeMap keeps group order deterministic
        let mut groups: BTreeMap<IdentityKey, IdentityGroup> = BTreeMap::new();
        for (index, observation) in observations.into_iter().enumerate() {
            match self.normalizer.normalize(&observation.address_text) {
                Ok(identity) => {
                    groups
                        .entry(identity.identity_key.clone())
                        .or_insert_with(|| IdentityGroup {
                            identity,
                            observations: Vec::new(),
                        })
                        .observations
                        .push(observation);
                }
                Err(err) => {
                    warn!(
                        batch_id = %batch_id,
                        observation_index = index,
                        source = %observation.source,
                        "Skipping observation: {}",
                        err
                    );
                    self.emit(IngestEvent::ObservationSkipped {
                        batch_id,
                        observation_index: index,
                        reason: err.to_string(),
                    });
                    summary.skipped += 1;
                    summary.errors.push(IngestIssue::for_observation(index, &err));
                }
            }
        }

        info!(
            batch_id = %batch_id,
            observations = observation_total,
            groups = groups.len(),
            skipped = summary.skipped,
            workers = self.options.max_concurrent_groups,
            "Batch ingestion started"
        );
        self.emit(IngestEvent::BatchStarted {
            batch_id,
            observations: observation_total,
            groups: groups.len(),
            timestamp: leadfuse_common::time::now(),
        });

        let results: Vec<GroupResult> = stream::iter(groups.into_values())
            .map(|group| self.process_group(batch_id, group))
            .buffer_unordered(self.options.max_concurrent_groups.max(1))
            .collect()
            .await;

        let mut fused = Vec::with_capacity(results.len());
        for result in results {
            match result {
                GroupResult::Fused {
                    record,
                    report,
                    enrichment_issue,
                } => {
                    summary.processed += 1;
                    summary.implausible_rejections += report.implausible_count();
                    if let Some(issue) = enrichment_issue {
                        summary.enrichment_degraded += 1;
                        summary.errors.push(issue);
                    }
                    summary.errors.extend(
                        report
                            .implausible_errors()
                            .map(|err| IngestIssue::for_group(&record.identity_key, &err)),
                    );
                    fused.push((*record, *report));
                }
                GroupResult::Failed(issue) => {
                    summary.failed += 1;
                    summary.errors.push(issue);
                }
            }
        }

        fused.sort_by(|a, b| a.0.identity_key.cmp(&b.0.identity_key));
        let (records, reports): (Vec<_>, Vec<_>) = fused.into_iter().unzip();

        info!(
            batch_id = %batch_id,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            enrichment_degraded = summary.enrichment_degraded,
            implausible = summary.implausible_rejections,
            "Batch ingestion completed"
        );
        self.emit(IngestEvent::BatchCompleted {
            batch_id,
            processed: summary.processed,
            skipped: summary.skipped,
            failed: summary.failed,
            timestamp: leadfuse_common::time::now(),
        });

        BatchOutcome {
            records,
            reports,
            summary,
        }
    }

    async fn process_group(&self, batch_id: Uuid, group: IdentityGroup) -> GroupResult {
        let key = group.identity.identity_key.clone();
        let _guard = self.store.lock_key(&key).await;

        let now = leadfuse_common::time::now();
        let existing = match self
            .store
            .get_or_create(&key, &group.identity.address, now)
            .await
        {
            Ok(record) => record,
            Err(source) => return self.fail_group(batch_id, &key, source),
        };

        let (snapshot, enrichment_issue) = self.fetch_enrichment(&group.identity).await;

        let ctx = FusionContext {
            policy: &self.policy,
            now,
        };
        let outcome = fusion::fuse(
            Some(&existing),
            &group.identity,
            &group.observations,
            snapshot.as_ref(),
            &ctx,
        );

        if let Err(source) = self.store.put(&outcome.record).await {
            return self.fail_group(batch_id, &key, source);
        }
        if let Err(e) = self.store.append_change_report(&outcome.report).await {
            // Record is already stored; history is best-effort
            warn!(identity_key = %key, error = %e, "Failed to append change report");
        }

        debug!(
            batch_id = %batch_id,
            identity_key = %key,
            observations = group.observations.len(),
            changes = outcome.report.changes.len(),
            "Group fused"
        );
        self.emit(IngestEvent::GroupFused {
            batch_id,
            identity_key: key.to_string(),
            fields_changed: outcome.report.changes.len(),
            candidates_rejected: outcome.report.rejected.len(),
            enrichment_used: outcome.report.enrichment_used,
        });

        GroupResult::Fused {
            record: Box::new(outcome.record),
            report: Box::new(outcome.report),
            enrichment_issue,
        }
    }

    fn fail_group(
        &self,
        batch_id: Uuid,
        key: &IdentityKey,
        source: leadfuse_common::Error,
    ) -> GroupResult {
        let err = IngestError::StoreWriteFailure {
            identity_key: key.to_string(),
            source,
        };
        error!(batch_id = %batch_id, identity_key = %key, "Group failed: {}", err);
        self.emit(IngestEvent::GroupFailed {
            batch_id,
            identity_key: key.to_string(),
            error: err.to_string(),
        });
        GroupResult::Failed(IngestIssue::for_group(key, &err))
    }

    /// Snapshot for the group, or `None` with the reason it is missing
    async fn fetch_enrichment(
        &self,
        identity: &NormalizedAddress,
    ) -> (Option<EnrichmentSnapshot>, Option<IngestIssue>) {
        let Some(client) = &self.enrichment else {
            return (None, None);
        };

        let timeout = self.options.enrichment_timeout;
        let reason = match tokio::time::timeout(timeout, client.fetch_snapshot(identity)).await {
            Ok(Ok(snapshot)) => return (Some(snapshot), None),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {} ms", timeout.as_millis()),
        };

        let err = IngestError::EnrichmentUnavailable {
            identity_key: identity.identity_key.to_string(),
            reason,
        };
        warn!(
            identity_key = %identity.identity_key,
            client = client.name(),
            "Continuing without enrichment: {}",
            err
        );
        (None, Some(IngestIssue::for_group(&identity.identity_key, &err)))
    }
}
