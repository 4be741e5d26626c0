//! SQLite-backed canonical store
//!
//! One row per identity key in `canonical_properties`. Map-shaped parts of the
//! record (fields, provenance, signals, contacts, extras, anchors) are stored as JSON
//! text. `change_reports` keeps the last N reports per key for audits.

use super::{CanonicalStore, KeyLocks, StoreOptions};
use crate::fusion::ChangeReport;
use crate::types::{CanonicalPropertyRecord, IdentityKey, StructuredAddress};
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadfuse_common::db::{init_database, init_memory_database};
use leadfuse_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

const CREATE_CANONICAL_PROPERTIES: &str = r#"
    CREATE TABLE IF NOT EXISTS canonical_properties (
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
        magnitude_anchors TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        last_fused_at TEXT,
        observation_count INTEGER NOT NULL DEFAULT 0,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
"#;

const CREATE_CHANGE_REPORTS: &str = r#"
    CREATE TABLE IF NOT EXISTS change_reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identity_key TEXT NOT NULL,
        fused_at TEXT NOT NULL,
        policy_version TEXT NOT NULL,
        report TEXT NOT NULL
    )
"#;

const CREATE_CHANGE_REPORTS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_change_reports_key ON change_reports(identity_key, id)";

const UPSERT_RECORD: &str = r#"
    INSERT INTO canonical_properties (
        identity_key, street_line, unit, city, state, postal_code,
        fields, provenance, distress_signals, contacts, extras_for_review,
        magnitude_anchors, created_at, last_fused_at, observation_count, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
    ON CONFLICT(identity_key) DO UPDATE SET
        street_line = excluded.street_line,
        unit = excluded.unit,
        city = excluded.city,
        state = excluded.state,
        postal_code = excluded.postal_code,
        fields = excluded.fields,
        provenance = excluded.provenance,
        distress_signals = excluded.distress_signals,
        contacts = excluded.contacts,
        extras_for_review = excluded.extras_for_review,
        magnitude_anchors = excluded.magnitude_anchors,
        created_at = excluded.created_at,
        last_fused_at = excluded.last_fused_at,
        observation_count = excluded.observation_count,
        updated_at = CURRENT_TIMESTAMP
"#;

const SELECT_RECORD_COLUMNS: &str = r#"
    SELECT identity_key, street_line, unit, city, state, postal_code,
           fields, provenance, distress_signals, contacts, extras_for_review,
           magnitude_anchors, created_at, last_fused_at, observation_count
    FROM canonical_properties
"#;

pub struct SqliteStore {
    pool: SqlitePool,
    options: StoreOptions,
    locks: KeyLocks,
}

impl SqliteStore {
    /// Wrap an existing pool, creating tables if needed
    pub async fn new(pool: SqlitePool, options: StoreOptions) -> Result<Self> {
        create_tables(&pool).await?;
        Ok(Self {
            pool,
            options,
            locks: KeyLocks::new(),
        })
    }

    /// Open (or create) the database file at `path`
    pub async fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        let pool = init_database(path).await?;
        let store = Self::new(pool, options).await?;
        info!(path = %path.display(), "Canonical store ready");
        Ok(store)
    }

    /// Store backed by a private in-memory database
    pub async fn in_memory(options: StoreOptions) -> Result<Self> {
        Self::new(init_memory_database().await?, options).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn create_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(CREATE_CANONICAL_PROPERTIES).execute(pool).await?;
    sqlx::query(CREATE_CHANGE_REPORTS).execute(pool).await?;
    sqlx::query(CREATE_CHANGE_REPORTS_INDEX).execute(pool).await?;
    add_missing_column(
        pool,
        "canonical_properties",
        "magnitude_anchors",
        "TEXT NOT NULL DEFAULT '{}'",
    )
    .await?;
    Ok(())
}

/// Bring databases created before `column` existed up to date
async fn add_missing_column(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await?;
    let present = rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>("name").ok())
        .any(|name| name == column);
    if !present {
        info!(table, column, "Adding missing column");
        sqlx::query(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table, column, definition
        ))
        .execute(pool)
        .await?;
    }
    Ok(())
}

fn json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let text: String = row.try_get(column)?;
    serde_json::from_str(&text).map_err(|e| {
        Error::Internal(format!("Corrupt JSON in column '{}': {}", column, e))
    })
}

fn row_to_record(row: &SqliteRow) -> Result<CanonicalPropertyRecord> {
    let observation_count: i64 = row.try_get("observation_count")?;
    Ok(CanonicalPropertyRecord {
        identity_key: IdentityKey::from_hex(row.try_get::<String, _>("identity_key")?),
        address: StructuredAddress {
            street_line: row.try_get("street_line")?,
            unit: row.try_get("unit")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            postal_code: row.try_get("postal_code")?,
        },
        fields: json_column(row, "fields")?,
        provenance: json_column(row, "provenance")?,
        distress_signals: json_column(row, "distress_signals")?,
        contacts: json_column(row, "contacts")?,
        extras_for_review: json_column(row, "extras_for_review")?,
        magnitude_anchors: json_column(row, "magnitude_anchors")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        last_fused_at: row.try_get::<Option<DateTime<Utc>>, _>("last_fused_at")?,
        observation_count: observation_count.max(0) as u64,
    })
}

#[async_trait]
impl CanonicalStore for SqliteStore {
    async fn get(&self, key: &IdentityKey) -> Result<Option<CanonicalPropertyRecord>> {
        let sql = format!("{} WHERE identity_key = ?", SELECT_RECORD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn put(&self, record: &CanonicalPropertyRecord) -> Result<()> {
        let fields = serde_json::to_string(&record.fields)?;
        let provenance = serde_json::to_string(&record.provenance)?;
        let signals = serde_json::to_string(&record.distress_signals)?;
        let contacts = serde_json::to_string(&record.contacts)?;
        let extras = serde_json::to_string(&record.extras_for_review)?;
        let anchors = serde_json::to_string(&record.magnitude_anchors)?;
        let observation_count = i64::try_from(record.observation_count).map_err(|_| {
            Error::InvalidInput(format!(
                "observation_count {} out of range",
                record.observation_count
            ))
        })?;

        let pool = &self.pool;
        let (fields, provenance, signals, contacts, extras, anchors) =
            (&fields, &provenance, &signals, &contacts, &extras, &anchors);

        retry_on_lock("put canonical record", self.options.max_lock_wait_ms, || async move {
            sqlx::query(UPSERT_RECORD)
                .bind(record.identity_key.as_str())
                .bind(&record.address.street_line)
                .bind(&record.address.unit)
                .bind(&record.address.city)
                .bind(&record.address.state)
                .bind(&record.address.postal_code)
                .bind(fields)
                .bind(provenance)
                .bind(signals)
                .bind(contacts)
                .bind(extras)
                .bind(anchors)
                .bind(record.created_at)
                .bind(record.last_fused_at)
                .bind(observation_count)
                .execute(pool)
                .await?;
            Ok::<_, Error>(())
        })
        .await?;

        debug!(identity_key = %record.identity_key, "Canonical record stored");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CanonicalPropertyRecord>> {
        let sql = format!("{} ORDER BY identity_key", SELECT_RECORD_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn append_change_report(&self, report: &ChangeReport) -> Result<()> {
        let body = serde_json::to_string(report)?;
        let limit = i64::try_from(self.options.history_limit).unwrap_or(i64::MAX);
        let pool = &self.pool;
        let body = &body;

        retry_on_lock("append change report", self.options.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;

            sqlx::query(
                "INSERT INTO change_reports (identity_key, fused_at, policy_version, report) VALUES (?, ?, ?, ?)",
            )
            .bind(report.identity_key.as_str())
            .bind(report.fused_at)
            .bind(&report.policy_version)
            .bind(body)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                DELETE FROM change_reports
                WHERE identity_key = ?
                  AND id NOT IN (
                      SELECT id FROM change_reports
                      WHERE identity_key = ?
                      ORDER BY id DESC
                      LIMIT ?
                  )
                "#,
            )
            .bind(report.identity_key.as_str())
            .bind(report.identity_key.as_str())
            .bind(limit)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, Error>(())
        })
        .await
    }

    async fn change_history(&self, key: &IdentityKey) -> Result<Vec<ChangeReport>> {
        let rows = sqlx::query(
            "SELECT report FROM change_reports WHERE identity_key = ? ORDER BY id ASC",
        )
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| json_column(row, "report")).collect()
    }

    fn key_locks(&self) -> &KeyLocks {
        &self.locks
    }
}
