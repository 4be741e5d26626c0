//! Ingestion event types and EventBus
//!
//! Progress of a batch is published as [`IngestEvent`]s on a broadcast channel.
//! Publishing never blocks ingestion; events are dropped when nobody listens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted while a batch is ingested
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// Batch accepted and grouped
    BatchStarted {
        batch_id: Uuid,
        observations: usize,
        groups: usize,
        timestamp: DateTime<Utc>,
    },

    /// An observation was rejected before grouping
    ObservationSkipped {
        batch_id: Uuid,
        observation_index: usize,
        reason: String,
    },

    /// One identity group was fused and persisted
    GroupFused {
        batch_id: Uuid,
        identity_key: String,
        fields_changed: usize,
        candidates_rejected: usize,
        enrichment_used: bool,
    },

    /// One identity group could not be persisted
    GroupFailed {
        batch_id: Uuid,
        identity_key: String,
        error: String,
    },

    /// Batch finished
    BatchCompleted {
        batch_id: Uuid,
        processed: usize,
        skipped: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`IngestEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IngestEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
