// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend (SQLite or MySQL through the sqlx `Any` driver).
//!
//! Three tables:
//! ```sql
//! CREATE TABLE record_versions (
//!   owner_id BIGINT, data_type VARCHAR(64), natural_key VARCHAR(255),
//!   valid_from BIGINT, valid_to BIGINT, ordinal BIGINT,
//!   payload_hash VARCHAR(64), payload LONGTEXT,       -- JSON as text
//!   PRIMARY KEY (owner_id, data_type, natural_key, valid_from)
//! );
//! CREATE TABLE sync_trackers (
//!   id BIGINT AUTO_INCREMENT PRIMARY KEY, owner_id, data_type,
//!   scheduled_at, run_start, run_end, status, detail,
//!   pending_slot TINYINT NULL,                         -- 1 while pending
//!   UNIQUE (owner_id, data_type, pending_slot)
//! );
//! CREATE TABLE owner_sync_state (
//!   owner_id, data_type, expires_at,
//!   PRIMARY KEY (owner_id, data_type)
//! );
//! ```
//!
//! `pending_slot` is NULL for every terminal tracker and NULLs never collide
//! in a unique index, so the database itself guarantees at most one Pending
//! tracker per (owner, data type).
//!
//! ## sqlx Any Driver Quirks
//!
//! Payloads are TEXT/LONGTEXT rather than native JSON because the `Any`
//! driver doesn't map MySQL's JSON type, and it hands LONGTEXT back as bytes,
//! so text columns are read as `String` with a `Vec<u8>` fallback.
//! `json_extract` / `JSON_EXTRACT` work on the text columns all the same.

use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, Row, Transaction};
use tracing::{debug, info};

use super::traits::{
    ApplyStats, ChangeSet, OwnerStateStore, StorageError, TrackerStore, VersionStore,
};
use super::versioning::{plan_mutation, MutationEffect, VersionEdit};
use crate::data_type::DataType;
use crate::query::{AttributeQuery, SqlDialect, SqlParam, SqlTranslator};
use crate::record::{OwnerId, VersionedRecord};
use crate::resilience::retry::{retry, RetryConfig};
use crate::tracker::{OwnerSyncState, SyncTracker, TrackerStatus};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

const VERSION_COLUMNS: &str =
    "owner_id, data_type, natural_key, valid_from, valid_to, ordinal, payload_hash, payload";
const TRACKER_COLUMNS: &str =
    "id, owner_id, data_type, scheduled_at, run_start, run_end, status, detail";

pub struct SqlStore {
    pool: AnyPool,
    dialect: SqlDialect,
}

impl SqlStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the schema.
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, StorageError> {
        install_drivers();

        let dialect = SqlDialect::from_url(connection_string);
        // SQLite serializes writers anyway; a single connection also keeps
        // `sqlite::memory:` databases alive and avoids lock upgrades failing
        // with SQLITE_BUSY.
        let max_connections = match dialect {
            SqlDialect::Sqlite => 1,
            SqlDialect::MySql => max_connections.max(1),
        };

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            let mut options = AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10));
            options = match dialect {
                SqlDialect::Sqlite => options
                    .idle_timeout(Option::<Duration>::None)
                    .max_lifetime(Option::<Duration>::None),
                SqlDialect::MySql => options.idle_timeout(Duration::from_secs(300)),
            };
            options.connect(connection_string).await.map_err(backend)
        })
        .await?;

        let store = Self { pool, dialect };

        if dialect == SqlDialect::Sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        info!(?dialect, max_connections, "SQL history store ready");
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    #[must_use]
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Enable WAL (Write-Ahead Logging) mode for SQLite so readers don't
    /// block the writer.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements: &[&str] = match self.dialect {
            SqlDialect::Sqlite => &[
                r#"
                CREATE TABLE IF NOT EXISTS record_versions (
                    owner_id INTEGER NOT NULL,
                    data_type TEXT NOT NULL,
                    natural_key TEXT NOT NULL,
                    valid_from INTEGER NOT NULL,
                    valid_to INTEGER NOT NULL,
                    ordinal INTEGER NOT NULL DEFAULT 0,
                    payload_hash TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    PRIMARY KEY (owner_id, data_type, natural_key, valid_from)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_versions_live ON record_versions (owner_id, data_type, valid_to)",
                r#"
                CREATE TABLE IF NOT EXISTS sync_trackers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id INTEGER NOT NULL,
                    data_type TEXT NOT NULL,
                    scheduled_at INTEGER NOT NULL,
                    run_start INTEGER,
                    run_end INTEGER,
                    status TEXT NOT NULL,
                    detail TEXT,
                    pending_slot INTEGER,
                    UNIQUE (owner_id, data_type, pending_slot)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_trackers_owner ON sync_trackers (owner_id, data_type, id)",
                r#"
                CREATE TABLE IF NOT EXISTS owner_sync_state (
                    owner_id INTEGER NOT NULL,
                    data_type TEXT NOT NULL,
                    expires_at INTEGER NOT NULL,
                    PRIMARY KEY (owner_id, data_type)
                )
                "#,
            ],
            // MySQL - LONGTEXT for JSON (sqlx Any driver doesn't support native JSON)
            SqlDialect::MySql => &[
                r#"
                CREATE TABLE IF NOT EXISTS record_versions (
                    owner_id BIGINT NOT NULL,
                    data_type VARCHAR(64) NOT NULL,
                    natural_key VARCHAR(255) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin NOT NULL,
                    valid_from BIGINT NOT NULL,
                    valid_to BIGINT NOT NULL,
                    ordinal BIGINT NOT NULL DEFAULT 0,
                    payload_hash VARCHAR(64) NOT NULL,
                    payload LONGTEXT NOT NULL,
                    PRIMARY KEY (owner_id, data_type, natural_key, valid_from),
                    INDEX idx_versions_live (owner_id, data_type, valid_to)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_trackers (
                    id BIGINT AUTO_INCREMENT PRIMARY KEY,
                    owner_id BIGINT NOT NULL,
                    data_type VARCHAR(64) NOT NULL,
                    scheduled_at BIGINT NOT NULL,
                    run_start BIGINT NULL,
                    run_end BIGINT NULL,
                    status VARCHAR(16) NOT NULL,
                    detail TEXT NULL,
                    pending_slot TINYINT NULL,
                    UNIQUE KEY uq_pending (owner_id, data_type, pending_slot),
                    INDEX idx_trackers_owner (owner_id, data_type, id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS owner_sync_state (
                    owner_id BIGINT NOT NULL,
                    data_type VARCHAR(64) NOT NULL,
                    expires_at BIGINT NOT NULL,
                    PRIMARY KEY (owner_id, data_type)
                )
                "#,
            ],
        };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql).execute(&self.pool).await.map_err(backend)
            })
            .await?;
        }
        Ok(())
    }

    async fn select_versions(
        &self,
        owner: OwnerId,
        data_type: DataType,
        window: &str,
        window_params: &[i64],
        query: &AttributeQuery,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        let filter = SqlTranslator::translate(query, "payload", self.dialect)?;
        let sql = format!(
            "SELECT {} FROM record_versions WHERE owner_id = ? AND data_type = ? AND {} AND {} \
             ORDER BY valid_from, ordinal, natural_key",
            VERSION_COLUMNS, window, filter.clause
        );

        let rows = retry("sql_select_versions", &RetryConfig::query(), || async {
            let mut q = sqlx::query(&sql).bind(owner.0).bind(data_type.as_str());
            for p in window_params {
                q = q.bind(*p);
            }
            for param in &filter.params {
                q = match param {
                    SqlParam::Text(s) => q.bind(s.clone()),
                    SqlParam::Integer(i) => q.bind(*i),
                    SqlParam::Numeric(n) => q.bind(*n),
                };
            }
            q.fetch_all(&self.pool).await.map_err(backend)
        })
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn key_versions(
        tx: &mut Transaction<'_, Any>,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        let sql = format!(
            "SELECT {} FROM record_versions WHERE owner_id = ? AND data_type = ? AND natural_key = ? \
             ORDER BY valid_from",
            VERSION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(owner.0)
            .bind(data_type.as_str())
            .bind(natural_key)
            .fetch_all(&mut **tx)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn execute_edit(
        tx: &mut Transaction<'_, Any>,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
        edit: VersionEdit,
    ) -> Result<(), StorageError> {
        match edit {
            VersionEdit::Close { valid_from, at } => {
                sqlx::query(
                    "UPDATE record_versions SET valid_to = ? \
                     WHERE owner_id = ? AND data_type = ? AND natural_key = ? AND valid_from = ?",
                )
                .bind(at)
                .bind(owner.0)
                .bind(data_type.as_str())
                .bind(natural_key)
                .bind(valid_from)
                .execute(&mut **tx)
                .await
                .map_err(backend)?;
            }
            VersionEdit::Remove { valid_from } => {
                sqlx::query(
                    "DELETE FROM record_versions \
                     WHERE owner_id = ? AND data_type = ? AND natural_key = ? AND valid_from = ?",
                )
                .bind(owner.0)
                .bind(data_type.as_str())
                .bind(natural_key)
                .bind(valid_from)
                .execute(&mut **tx)
                .await
                .map_err(backend)?;
            }
            VersionEdit::Add(record) => {
                let payload = serde_json::to_string(&record.payload)
                    .map_err(|e| StorageError::Backend(format!("payload encode: {}", e)))?;
                sqlx::query(
                    "INSERT INTO record_versions \
                     (owner_id, data_type, natural_key, valid_from, valid_to, ordinal, payload_hash, payload) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(record.owner.0)
                .bind(record.data_type.as_str())
                .bind(record.natural_key.clone())
                .bind(record.valid_from)
                .bind(record.valid_to)
                .bind(record.ordinal)
                .bind(record.payload_hash.clone())
                .bind(payload)
                .execute(&mut **tx)
                .await
                .map_err(backend)?;
            }
        }
        Ok(())
    }

    async fn tracker_by_id(&self, id: i64) -> Result<Option<SyncTracker>, StorageError> {
        let sql = format!("SELECT {} FROM sync_trackers WHERE id = ?", TRACKER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(row_to_tracker).transpose()
    }
}

/// Read a text column as String, falling back to bytes (MySQL LONGTEXT).
fn get_text(row: &AnyRow, column: &str) -> Result<Option<String>, StorageError> {
    if let Ok(s) = row.try_get::<Option<String>, _>(column) {
        return Ok(s);
    }
    let bytes: Option<Vec<u8>> = row.try_get(column).map_err(backend)?;
    bytes
        .map(|b| String::from_utf8(b).map_err(|e| StorageError::Backend(e.to_string())))
        .transpose()
}

fn required_text(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    get_text(row, column)?.ok_or_else(|| StorageError::Backend(format!("NULL in column '{}'", column)))
}

fn parse_data_type(row: &AnyRow) -> Result<DataType, StorageError> {
    DataType::from_str(&required_text(row, "data_type")?).map_err(StorageError::Backend)
}

fn row_to_record(row: &AnyRow) -> Result<VersionedRecord, StorageError> {
    let payload_text = required_text(row, "payload")?;
    let payload = serde_json::from_str(&payload_text)
        .map_err(|e| StorageError::Backend(format!("corrupt payload: {}", e)))?;
    Ok(VersionedRecord {
        owner: OwnerId(row.try_get("owner_id").map_err(backend)?),
        data_type: parse_data_type(row)?,
        natural_key: required_text(row, "natural_key")?,
        valid_from: row.try_get("valid_from").map_err(backend)?,
        valid_to: row.try_get("valid_to").map_err(backend)?,
        payload,
        payload_hash: required_text(row, "payload_hash")?,
        ordinal: row.try_get("ordinal").map_err(backend)?,
    })
}

fn row_to_tracker(row: &AnyRow) -> Result<SyncTracker, StorageError> {
    Ok(SyncTracker {
        id: row.try_get("id").map_err(backend)?,
        owner: OwnerId(row.try_get("owner_id").map_err(backend)?),
        data_type: parse_data_type(row)?,
        scheduled_at: row.try_get("scheduled_at").map_err(backend)?,
        run_start: row.try_get("run_start").map_err(backend)?,
        run_end: row.try_get("run_end").map_err(backend)?,
        status: TrackerStatus::from_str(&required_text(row, "status")?).map_err(StorageError::Backend)?,
        detail: get_text(row, "detail")?,
    })
}

#[async_trait]
impl VersionStore for SqlStore {
    async fn get_live(
        &self,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
        as_of: i64,
    ) -> Result<Option<VersionedRecord>, StorageError> {
        let sql = format!(
            "SELECT {} FROM record_versions \
             WHERE owner_id = ? AND data_type = ? AND natural_key = ? AND valid_from <= ? AND valid_to > ?",
            VERSION_COLUMNS
        );
        let row = retry("sql_get_live", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(owner.0)
                .bind(data_type.as_str())
                .bind(natural_key)
                .bind(as_of)
                .bind(as_of)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_live(
        &self,
        owner: OwnerId,
        data_type: DataType,
        as_of: i64,
        query: &AttributeQuery,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        self.select_versions(owner, data_type, "valid_from <= ? AND valid_to > ?", &[as_of, as_of], query)
            .await
    }

    async fn list_range(
        &self,
        owner: OwnerId,
        data_type: DataType,
        from: i64,
        to: i64,
        query: &AttributeQuery,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        self.select_versions(owner, data_type, "valid_from < ? AND valid_to > ?", &[to, from], query)
            .await
    }

    async fn history(
        &self,
        owner: OwnerId,
        data_type: DataType,
        natural_key: &str,
    ) -> Result<Vec<VersionedRecord>, StorageError> {
        let sql = format!(
            "SELECT {} FROM record_versions WHERE owner_id = ? AND data_type = ? AND natural_key = ? \
             ORDER BY valid_from",
            VERSION_COLUMNS
        );
        let rows = retry("sql_history", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(owner.0)
                .bind(data_type.as_str())
                .bind(natural_key)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn apply(&self, change_set: &ChangeSet) -> Result<ApplyStats, StorageError> {
        let mut stats = ApplyStats::default();
        if change_set.is_empty() {
            return Ok(stats);
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;
        for mutation in &change_set.mutations {
            let key = mutation.natural_key();
            let versions = Self::key_versions(&mut tx, change_set.owner, change_set.data_type, key).await?;
            // An early return drops `tx`, which rolls it back.
            let (edits, effect) = plan_mutation(
                change_set.owner,
                change_set.data_type,
                change_set.at,
                &versions,
                mutation,
            )?;
            for edit in edits {
                Self::execute_edit(&mut tx, change_set.owner, change_set.data_type, key, edit).await?;
            }
            match effect {
                MutationEffect::Inserted => stats.inserted += 1,
                MutationEffect::Evolved => stats.evolved += 1,
                MutationEffect::Replaced => stats.replaced += 1,
                MutationEffect::Unchanged => stats.unchanged += 1,
            }
        }
        tx.commit().await.map_err(backend)?;

        debug!(
            owner = %change_set.owner,
            data_type = %change_set.data_type,
            inserted = stats.inserted,
            evolved = stats.evolved,
            replaced = stats.replaced,
            "Change set committed"
        );
        Ok(stats)
    }
}

#[async_trait]
impl TrackerStore for SqlStore {
    async fn get_or_create_pending(
        &self,
        owner: OwnerId,
        data_type: DataType,
        scheduled_at: i64,
    ) -> Result<SyncTracker, StorageError> {
        let insert = match self.dialect {
            SqlDialect::Sqlite => {
                "INSERT OR IGNORE INTO sync_trackers (owner_id, data_type, scheduled_at, status, pending_slot) \
                 VALUES (?, ?, ?, 'pending', 1)"
            }
            SqlDialect::MySql => {
                "INSERT IGNORE INTO sync_trackers (owner_id, data_type, scheduled_at, status, pending_slot) \
                 VALUES (?, ?, ?, 'pending', 1)"
            }
        };

        // The unique index makes the insert a no-op when a Pending row exists.
        // A concurrent complete_cycle can swap the row between the two
        // statements, in which case the next round finds the new one.
        for _ in 0..3 {
            retry("sql_create_pending", &RetryConfig::query(), || async {
                sqlx::query(insert)
                    .bind(owner.0)
                    .bind(data_type.as_str())
                    .bind(scheduled_at)
                    .execute(&self.pool)
                    .await
                    .map_err(backend)
            })
            .await?;
            if let Some(tracker) = self.pending(owner, data_type).await? {
                return Ok(tracker);
            }
        }
        Err(StorageError::Backend(format!(
            "no pending tracker for {}/{} after insert",
            owner, data_type
        )))
    }

    async fn pending(
        &self,
        owner: OwnerId,
        data_type: DataType,
    ) -> Result<Option<SyncTracker>, StorageError> {
        let sql = format!(
            "SELECT {} FROM sync_trackers WHERE owner_id = ? AND data_type = ? AND pending_slot = 1",
            TRACKER_COLUMNS
        );
        let row = retry("sql_pending", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(owner.0)
                .bind(data_type.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        row.as_ref().map(row_to_tracker).transpose()
    }

    async fn mark_started(&self, id: i64, run_start: i64) -> Result<SyncTracker, StorageError> {
        let result = sqlx::query("UPDATE sync_trackers SET run_start = ? WHERE id = ? AND pending_slot = 1")
            .bind(run_start)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        let tracker = self.tracker_by_id(id).await?.ok_or(StorageError::TrackerNotFound(id))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::TrackerFinished(id));
        }
        Ok(tracker)
    }

    async fn complete_cycle(
        &self,
        id: i64,
        status: TrackerStatus,
        detail: Option<String>,
        run_end: i64,
        next_scheduled_at: i64,
        expires_at: Option<i64>,
    ) -> Result<(SyncTracker, SyncTracker), StorageError> {
        if !status.is_terminal() {
            return Err(StorageError::InvalidTransition { id, status });
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;

        let select = format!("SELECT {} FROM sync_trackers WHERE id = ?", TRACKER_COLUMNS);
        let row = sqlx::query(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
            .ok_or(StorageError::TrackerNotFound(id))?;
        let mut completed = row_to_tracker(&row)?;

        let result = sqlx::query(
            "UPDATE sync_trackers SET status = ?, detail = ?, run_end = ?, pending_slot = NULL \
             WHERE id = ? AND pending_slot = 1",
        )
        .bind(status.as_str())
        .bind(detail.clone())
        .bind(run_end)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::TrackerFinished(id));
        }
        completed.status = status;
        completed.detail = detail;
        completed.run_end = Some(run_end);

        sqlx::query(
            "INSERT INTO sync_trackers (owner_id, data_type, scheduled_at, status, pending_slot) \
             VALUES (?, ?, ?, 'pending', 1)",
        )
        .bind(completed.owner.0)
        .bind(completed.data_type.as_str())
        .bind(next_scheduled_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let pending = format!(
            "SELECT {} FROM sync_trackers WHERE owner_id = ? AND data_type = ? AND pending_slot = 1",
            TRACKER_COLUMNS
        );
        let row = sqlx::query(&pending)
            .bind(completed.owner.0)
            .bind(completed.data_type.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
        let next = row_to_tracker(&row)?;

        if let Some(expires_at) = expires_at {
            sqlx::query(self.upsert_expiry_sql())
                .bind(completed.owner.0)
                .bind(completed.data_type.as_str())
                .bind(expires_at)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok((completed, next))
    }

    async fn has_succeeded(&self, owner: OwnerId, data_type: DataType) -> Result<bool, StorageError> {
        let row = retry("sql_has_succeeded", &RetryConfig::query(), || async {
            sqlx::query(
                "SELECT 1 AS hit FROM sync_trackers WHERE owner_id = ? AND data_type = ? \
                 AND status IN ('finished', 'warning') LIMIT 1",
            )
            .bind(owner.0)
            .bind(data_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
        })
        .await?;
        Ok(row.is_some())
    }

    async fn latest_terminal(
        &self,
        owner: OwnerId,
        data_type: DataType,
    ) -> Result<Option<SyncTracker>, StorageError> {
        let sql = format!(
            "SELECT {} FROM sync_trackers WHERE owner_id = ? AND data_type = ? AND status <> 'pending' \
             ORDER BY id DESC LIMIT 1",
            TRACKER_COLUMNS
        );
        let row = retry("sql_latest_terminal", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(owner.0)
                .bind(data_type.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        row.as_ref().map(row_to_tracker).transpose()
    }

    async fn recent_trackers(
        &self,
        owner: OwnerId,
        data_type: DataType,
        limit: usize,
    ) -> Result<Vec<SyncTracker>, StorageError> {
        let sql = format!(
            "SELECT {} FROM sync_trackers WHERE owner_id = ? AND data_type = ? ORDER BY id DESC LIMIT ?",
            TRACKER_COLUMNS
        );
        let rows = retry("sql_recent_trackers", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(owner.0)
                .bind(data_type.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        rows.iter().map(row_to_tracker).collect()
    }

    async fn list_for_owner(&self, owner: OwnerId) -> Result<Vec<SyncTracker>, StorageError> {
        let sql = format!(
            "SELECT {} FROM sync_trackers WHERE owner_id = ? ORDER BY id",
            TRACKER_COLUMNS
        );
        let rows = retry("sql_list_trackers", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(owner.0)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        rows.iter().map(row_to_tracker).collect()
    }
}

impl SqlStore {
    fn upsert_expiry_sql(&self) -> &'static str {
        match self.dialect {
            SqlDialect::Sqlite => {
                "INSERT INTO owner_sync_state (owner_id, data_type, expires_at) VALUES (?, ?, ?) \
                 ON CONFLICT(owner_id, data_type) DO UPDATE SET expires_at = excluded.expires_at"
            }
            SqlDialect::MySql => {
                "INSERT INTO owner_sync_state (owner_id, data_type, expires_at) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE expires_at = VALUES(expires_at)"
            }
        }
    }
}

#[async_trait]
impl OwnerStateStore for SqlStore {
    async fn owner_state(&self, owner: OwnerId) -> Result<OwnerSyncState, StorageError> {
        let rows = retry("sql_owner_state", &RetryConfig::query(), || async {
            sqlx::query("SELECT data_type, expires_at FROM owner_sync_state WHERE owner_id = ?")
                .bind(owner.0)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        let mut state = OwnerSyncState::new(owner);
        for row in &rows {
            let expires_at: i64 = row.try_get("expires_at").map_err(backend)?;
            state.expiries.insert(parse_data_type(row)?, expires_at);
        }
        Ok(state)
    }

    async fn set_expiry(
        &self,
        owner: OwnerId,
        data_type: DataType,
        expires_at: i64,
    ) -> Result<(), StorageError> {
        let sql = self.upsert_expiry_sql();
        retry("sql_set_expiry", &RetryConfig::query(), || async {
            sqlx::query(sql)
                .bind(owner.0)
                .bind(data_type.as_str())
                .bind(expires_at)
                .execute(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::OPEN_END;
    use crate::storage::Mutation;
    use serde_json::json;

    const OWNER: OwnerId = OwnerId(2112000001);

    async fn memory_store() -> SqlStore {
        SqlStore::new("sqlite::memory:", 4).await.unwrap()
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let store = memory_store().await;
        store.init_schema().await.unwrap();
        assert_eq!(store.dialect(), SqlDialect::Sqlite);
    }

    #[tokio::test]
    async fn test_insert_replace_and_read_back() {
        let store = memory_store().await;
        let dt = DataType::Standings;
        let rec = VersionedRecord::new(
            OWNER,
            dt,
            "faction:500001".into(),
            1_000,
            json!({"from_type": "faction", "from_id": 500001, "standing": 1.25}),
        );
        store.insert(&rec).await.unwrap();

        let live = store.get_live(OWNER, dt, "faction:500001", 1_000).await.unwrap().unwrap();
        assert_eq!(live, rec);
        assert_eq!(live.valid_to, OPEN_END);

        let changed = store
            .replace(OWNER, dt, "faction:500001", 2_000, json!({"from_type": "faction", "from_id": 500001, "standing": 2.5}))
            .await
            .unwrap();
        assert!(changed);

        let history = store.history(OWNER, dt, "faction:500001").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].valid_to, 2_000);
        assert_eq!(history[1].payload["standing"], json!(2.5));
    }

    #[tokio::test]
    async fn test_rolled_back_change_set() {
        let store = memory_store().await;
        let dt = DataType::Skills;
        let mut cs = ChangeSet::new(OWNER, dt, 500);
        cs.mutations.push(Mutation::Insert {
            natural_key: "3300".into(),
            payload: json!({"skill_id": 3300, "level": 4}),
            ordinal: 0,
        });
        cs.mutations.push(Mutation::Evolve {
            natural_key: "missing".into(),
        });

        let err = store.apply(&cs).await.unwrap_err();
        assert!(matches!(err, StorageError::NoOpenVersion { .. }));
        assert!(store.get_live(OWNER, dt, "3300", 500).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_filter_runs_in_sqlite() {
        let store = memory_store().await;
        let dt = DataType::Contacts;
        let mut cs = ChangeSet::new(OWNER, dt, 10);
        for (i, (id, standing, kind)) in [(1, 10.0, "character"), (2, -5.0, "corporation"), (3, 5.0, "character")]
            .into_iter()
            .enumerate()
        {
            cs.mutations.push(Mutation::Insert {
                natural_key: id.to_string(),
                payload: json!({"contact_id": id, "standing": standing, "contact_type": kind}),
                ordinal: i as i64,
            });
        }
        store.apply(&cs).await.unwrap();

        let query = AttributeQuery::equals("contact_type", "character")
            .and(AttributeQuery::range("standing", Some(0.0), Some(7.5)));
        let hits = store.list_live(OWNER, dt, 10, &query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].natural_key, "3");
    }

    #[tokio::test]
    async fn test_tracker_lifecycle() {
        let store = memory_store().await;
        let dt = DataType::WalletJournal;
        let t = store.get_or_create_pending(OWNER, dt, 100).await.unwrap();
        assert_eq!(store.get_or_create_pending(OWNER, dt, 999).await.unwrap().id, t.id);

        let started = store.mark_started(t.id, 105).await.unwrap();
        assert_eq!(started.run_start, Some(105));

        let (done, next) = store
            .complete_cycle(
                t.id,
                TrackerStatus::Warning,
                Some("2 duplicates".into()),
                110,
                4_000,
                Some(4_000),
            )
            .await
            .unwrap();
        assert_eq!(done.status, TrackerStatus::Warning);
        assert_eq!(done.detail.as_deref(), Some("2 duplicates"));
        assert_eq!(next.status, TrackerStatus::Pending);
        assert_eq!(next.scheduled_at, 4_000);

        assert_eq!(store.latest_terminal(OWNER, dt).await.unwrap().unwrap().id, t.id);
        assert_eq!(store.recent_trackers(OWNER, dt, 10).await.unwrap().len(), 2);
        assert_eq!(store.owner_state(OWNER).await.unwrap().expiry(dt), Some(4_000));
        assert!(store.has_succeeded(OWNER, dt).await.unwrap());
        assert!(!store.has_succeeded(OWNER, DataType::Assets).await.unwrap());

        // A second completion of the same tracker rolls back, expiry included
        let err = store
            .complete_cycle(t.id, TrackerStatus::Error, None, 120, 9_000, Some(9_000))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TrackerFinished(_)));
        assert_eq!(store.owner_state(OWNER).await.unwrap().expiry(dt), Some(4_000));
        assert_eq!(store.pending(OWNER, dt).await.unwrap().unwrap().id, next.id);
        assert!(matches!(
            store.mark_started(t.id, 200).await.unwrap_err(),
            StorageError::TrackerFinished(_)
        ));
    }

    #[tokio::test]
    async fn test_owner_state_upsert() {
        let store = memory_store().await;
        store.set_expiry(OWNER, DataType::Assets, 10).await.unwrap();
        store.set_expiry(OWNER, DataType::Assets, 20).await.unwrap();
        let state = store.owner_state(OWNER).await.unwrap();
        assert_eq!(state.expiry(DataType::Assets), Some(20));
        assert_eq!(state.expiries.len(), 1);
    }
}
