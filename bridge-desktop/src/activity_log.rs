//! Activity log storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    Account, ActionKind, ActivityEntry, ActivityRecorder, ActivityStatus, Clock,
};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS activity_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp INTEGER NOT NULL,
        connection_id TEXT NOT NULL,
        provider TEXT NOT NULL,
        bucket_name TEXT NOT NULL,
        action_type TEXT NOT NULL,
        object_path_before TEXT,
        object_path_after TEXT,
        status TEXT NOT NULL,
        error_message TEXT,
        file_size INTEGER,
        source TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_activity_connection ON activity_log(connection_id)",
    "CREATE INDEX IF NOT EXISTS idx_activity_action ON activity_log(action_type)",
];

const COLUMNS: &str = "id, timestamp, connection_id, provider, bucket_name, action_type, \
     object_path_before, object_path_after, status, error_message, file_size, source";

/// A stored activity row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: i64,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub connection_id: String,
    pub provider: String,
    pub bucket_name: String,
    pub action_type: String,
    pub object_path_before: Option<String>,
    pub object_path_after: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub file_size: Option<i64>,
    pub source: String,
}

/// Query filters; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityFilters {
    pub connection_id: Option<String>,
    pub bucket: Option<String>,
    pub action: Option<ActionKind>,
    pub status: Option<ActivityStatus>,
    /// Inclusive lower bound, Unix milliseconds
    pub since: Option<i64>,
    /// Inclusive upper bound, Unix milliseconds
    pub until: Option<i64>,
    /// Substring of either object path
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// SQLite-backed activity recorder.
///
/// Entries are only written for accounts with `enable_activity_log` set.
/// Write failures are logged and dropped.
pub struct SqliteActivityLog {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteActivityLog {
    /// Open (or create) the log at `db_path`.
    pub async fn open(db_path: PathBuf, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to open activity log: {}", e)))?;

        Self::migrate(&pool).await?;
        debug!(path = ?db_path, "Initialized activity log");

        Ok(Self { pool, clock })
    }

    /// Create a throwaway log (for testing)
    pub async fn in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        // Every connection to :memory: is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to open activity log: {}", e)))?;

        Self::migrate(&pool).await?;
        Ok(Self { pool, clock })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| BridgeError::DatabaseError(format!("Failed to create schema: {}", e)))?;
        }
        Ok(())
    }

    async fn insert(&self, account: &Account, entry: &ActivityEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (
                timestamp, connection_id, provider, bucket_name, action_type,
                object_path_before, object_path_after, status, error_message,
                file_size, source
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.clock.unix_timestamp_millis())
        .bind(&account.id)
        .bind(account.provider.as_str())
        .bind(&entry.bucket)
        .bind(entry.action.as_str())
        .bind(&entry.path_before)
        .bind(&entry.path_after)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .bind(entry.byte_count.map(|bytes| i64::try_from(bytes).unwrap_or(i64::MAX)))
        .bind(entry.source.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to insert activity: {}", e)))?;

        Ok(())
    }

    /// Newest-first entries matching `filters`.
    pub async fn query(
        &self,
        filters: &ActivityFilters,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<ActivityRecord>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM activity_log WHERE 1=1", COLUMNS));
        push_filters(&mut builder, filters);
        builder.push(" ORDER BY timestamp DESC, id DESC");

        match (limit, offset) {
            (Some(limit), offset) => {
                builder.push(" LIMIT ").push_bind(i64::from(limit));
                builder.push(" OFFSET ").push_bind(i64::from(offset.unwrap_or(0)));
            }
            (None, Some(offset)) => {
                builder.push(" LIMIT -1 OFFSET ").push_bind(i64::from(offset));
            }
            (None, None) => {}
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to query activity: {}", e)))?;

        rows.iter().map(record_from_row).collect()
    }

    /// Delete entries, optionally only for one connection and/or before a
    /// timestamp. Returns the number of deleted rows.
    pub async fn clear(&self, connection_id: Option<&str>, before: Option<i64>) -> Result<u64> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM activity_log WHERE 1=1");
        if let Some(connection_id) = connection_id {
            builder.push(" AND connection_id = ").push_bind(connection_id.to_string());
        }
        if let Some(before) = before {
            builder.push(" AND timestamp < ").push_bind(before);
        }

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to clear activity: {}", e)))?;

        debug!(deleted = result.rows_affected(), "Cleared activity log");
        Ok(result.rows_affected())
    }

    /// Render matching entries as JSON or CSV.
    pub async fn export(&self, format: ExportFormat, filters: &ActivityFilters) -> Result<String> {
        let records = self.query(filters, None, None).await?;
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&records)?),
            ExportFormat::Csv => Ok(to_csv(&records)),
        }
    }
}

#[async_trait]
impl ActivityRecorder for SqliteActivityLog {
    async fn record(&self, account: &Account, entry: ActivityEntry) {
        if !account.enable_activity_log {
            return;
        }

        if let Err(e) = self.insert(account, &entry).await {
            warn!(
                account_id = %account.id,
                action = %entry.action,
                error = %e,
                "Failed to record activity"
            );
        }
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filters: &ActivityFilters) {
    if let Some(connection_id) = &filters.connection_id {
        builder.push(" AND connection_id = ").push_bind(connection_id.clone());
    }
    if let Some(bucket) = &filters.bucket {
        builder.push(" AND bucket_name = ").push_bind(bucket.clone());
    }
    if let Some(action) = filters.action {
        builder.push(" AND action_type = ").push_bind(action.as_str());
    }
    if let Some(status) = filters.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(since) = filters.since {
        builder.push(" AND timestamp >= ").push_bind(since);
    }
    if let Some(until) = filters.until {
        builder.push(" AND timestamp <= ").push_bind(until);
    }
    if let Some(search) = &filters.search {
        let pattern = format!("%{}%", search);
        builder
            .push(" AND (object_path_before LIKE ")
            .push_bind(pattern.clone())
            .push(" OR object_path_after LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ActivityRecord> {
    let read = |e: sqlx::Error| BridgeError::DatabaseError(format!("Malformed activity row: {}", e));
    Ok(ActivityRecord {
        id: row.try_get("id").map_err(read)?,
        timestamp: row.try_get("timestamp").map_err(read)?,
        connection_id: row.try_get("connection_id").map_err(read)?,
        provider: row.try_get("provider").map_err(read)?,
        bucket_name: row.try_get("bucket_name").map_err(read)?,
        action_type: row.try_get("action_type").map_err(read)?,
        object_path_before: row.try_get("object_path_before").map_err(read)?,
        object_path_after: row.try_get("object_path_after").map_err(read)?,
        status: row.try_get("status").map_err(read)?,
        error_message: row.try_get("error_message").map_err(read)?,
        file_size: row.try_get("file_size").map_err(read)?,
        source: row.try_get("source").map_err(read)?,
    })
}

fn to_csv(records: &[ActivityRecord]) -> String {
    let mut csv = String::from(
        "Timestamp,Connection ID,Provider,Bucket,Action,Path Before,Path After,Status,Error,File Size,Source\n",
    );
    for record in records {
        let timestamp = Utc
            .timestamp_millis_opt(record.timestamp)
            .single()
            .map(|time| time.to_rfc3339())
            .unwrap_or_default();
        let fields = [
            timestamp,
            record.connection_id.clone(),
            record.provider.clone(),
            record.bucket_name.clone(),
            record.action_type.clone(),
            record.object_path_before.clone().unwrap_or_default(),
            record.object_path_after.clone().unwrap_or_default(),
            record.status.clone(),
            record.error_message.clone().unwrap_or_default(),
            record.file_size.map(|size| size.to_string()).unwrap_or_default(),
            record.source.clone(),
        ];
        let line: Vec<_> = fields.iter().map(|field| csv_field(field)).collect();
        csv.push_str(&line.join(","));
        csv.push('\n');
    }
    csv
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
