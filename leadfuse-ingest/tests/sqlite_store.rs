//! SQLite canonical store: persistence, overwrite semantics, history retention

use chrono::{TimeZone, Utc};
use leadfuse_ingest::fusion::{fuse, ConflictResolutionPolicy, FusionContext};
use leadfuse_ingest::normalizer::normalize;
use leadfuse_ingest::store::{CanonicalStore, SqliteStore, StoreOptions};
use leadfuse_ingest::types::{
    ContactType, FieldValue, ObservedContact, PropertyField, RawPropertyObservation, SourceKind,
};

const ADDRESS: &str = "4410 Lakeview Blvd Apt 3B, Madison, WI 53703";

fn options(history_limit: usize) -> StoreOptions {
    StoreOptions {
        history_limit,
        max_lock_wait_ms: 1000,
    }
}

fn sample_observation(day: u32) -> RawPropertyObservation {
    let mut obs = RawPropertyObservation::new(
        SourceKind::RecordFeed,
        ADDRESS,
        Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap(),
    );
    obs.attributes = obs
        .attributes
        .with(PropertyField::Bedrooms, FieldValue::Number(2.0))
        .with(PropertyField::PropertyType, FieldValue::Text("condo".to_string()));
    obs.owner_name = Some("Lee, Dana".to_string());
    obs.price_hint = Some(289_000.0);
    obs.distress_signals.insert("hoa-lien".to_string());
    obs.contacts.push(ObservedContact {
        contact_type: ContactType::Phone,
        value: "(608) 555-0142".to_string(),
        confidence: 0.7,
        source: None,
    });
    obs.attributes.extras.insert("parking".to_string(), "garage".to_string());
    obs
}

fn fused_record(day: u32) -> leadfuse_ingest::fusion::FusionOutcome {
    let policy = ConflictResolutionPolicy::default();
    let ctx = FusionContext {
        policy: &policy,
        now: Utc.with_ymd_and_hms(2024, 6, day, 13, 0, 0).unwrap(),
    };
    let identity = normalize(ADDRESS).unwrap();
    fuse(None, &identity, &[sample_observation(day)], None, &ctx)
}

#[tokio::test]
async fn test_put_then_get_returns_same_record() {
    let store = SqliteStore::in_memory(options(20)).await.unwrap();
    let outcome = fused_record(1);

    store.put(&outcome.record).await.unwrap();
    let loaded = store.get(&outcome.record.identity_key).await.unwrap().unwrap();

    assert_eq!(loaded, outcome.record);
    assert_eq!(loaded.address.unit.as_deref(), Some("apt 3b"));
    assert_eq!(loaded.contacts[0].normalized, "6085550142");
}

#[tokio::test]
async fn test_put_is_full_overwrite() {
    let store = SqliteStore::in_memory(options(20)).await.unwrap();
    let mut record = fused_record(1).record;

    store.put(&record).await.unwrap();
    store.put(&record).await.unwrap();

    record.fields.remove(&PropertyField::PriceHint);
    record.observation_count = 9;
    store.put(&record).await.unwrap();

    let all = store.list().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].observation_count, 9);
    assert!(all[0].field(PropertyField::PriceHint).is_none());
}

#[tokio::test]
async fn test_get_or_create_does_not_persist() {
    let store = SqliteStore::in_memory(options(20)).await.unwrap();
    let identity = normalize(ADDRESS).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let fresh = store
        .get_or_create(&identity.identity_key, &identity.address, now)
        .await
        .unwrap();

    assert_eq!(fresh.observation_count, 0);
    assert!(fresh.fields.is_empty());
    assert!(store.get(&identity.identity_key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_change_history_keeps_last_n() {
    let store = SqliteStore::in_memory(options(3)).await.unwrap();
    let key = fused_record(1).record.identity_key;

    for day in 1..=5 {
        store.append_change_report(&fused_record(day).report).await.unwrap();
    }

    let history = store.change_history(&key).await.unwrap();
    assert_eq!(history.len(), 3);
    let days: Vec<_> = history
        .iter()
        .map(|r| r.fused_at.format("%d").to_string())
        .collect();
    assert_eq!(days, vec!["03", "04", "05"]);
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leads.db");
    let record = fused_record(2).record;

    {
        let store = SqliteStore::open(&path, options(20)).await.unwrap();
        store.put(&record).await.unwrap();
        store.pool().close().await;
    }

    let reopened = SqliteStore::open(&path, options(20)).await.unwrap();
    let loaded = reopened.get(&record.identity_key).await.unwrap().unwrap();
    assert_eq!(loaded.text(PropertyField::OwnerName), Some("Lee, Dana"));
    assert!(loaded.distress_signals.contains("hoa-lien"));
    assert_eq!(loaded.extras_for_review.get("parking").map(String::as_str), Some("garage"));
}

#[tokio::test]
async fn test_magnitude_anchors_persist_and_old_tables_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.db");

    // Table as created before magnitude anchors were stored
    let pool = leadfuse_common::db::init_database(&path).await.unwrap();
    sqlx::query(
        "CREATE TABLE canonical_properties (
            identity_key TEXT PRIMARY KEY,
            street_line TEXT NOT NULL,
            unit TEXT,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            postal_code TEXT NOT NULL,
            fields TEXT NOT NULL,
            provenance TEXT NOT NULL,
            distress_signals TEXT NOT NULL,
            contacts TEXT NOT NULL,
            extras_for_review TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_fused_at TEXT,
            observation_count INTEGER NOT NULL DEFAULT 0,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(&pool)
    .await
    .unwrap();

    let store = SqliteStore::new(pool, options(20)).await.unwrap();
    let record = fused_record(3).record;
    assert_eq!(
        record.magnitude_anchors.get(&PropertyField::PriceHint),
        Some(&289_000.0)
    );

    store.put(&record).await.unwrap();
    let loaded = store.get(&record.identity_key).await.unwrap().unwrap();
    assert_eq!(loaded.magnitude_anchors, record.magnitude_anchors);
}
