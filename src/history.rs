//! Append-only log of delivered conversions.
//!
//! Writes go through [`record_best_effort`]: a conversion that produced its
//! output stays successful even when the log entry cannot be stored.

use crate::error::HistoryError;
use crate::operation::Operation;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};

/// SQLite's `CURRENT_TIMESTAMP` layout, always UTC.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One delivered conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Row id; `None` until stored.
    pub id: Option<i64>,
    /// Name the client uploaded (`"MERGE"` for merges).
    pub filename: String,
    pub operation: Operation,
    /// File name of the output, without directories.
    pub output_filename: String,
    pub user_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// A new entry stamped with the current time.
    pub fn new(
        filename: impl Into<String>,
        operation: Operation,
        output_filename: impl Into<String>,
        user_id: Option<i64>,
    ) -> Self {
        Self {
            id: None,
            filename: filename.into(),
            operation,
            output_filename: output_filename.into(),
            user_id,
            // whole seconds, matching what the store keeps
            timestamp: DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_else(Utc::now),
        }
    }
}

/// Storage for [`HistoryEntry`] rows.
pub trait HistoryRecorder: Send + Sync {
    /// Append `entry`, returning its row id.
    fn record(&self, entry: &HistoryEntry) -> Result<i64, HistoryError>;

    /// Every entry of `user_id`, newest first.
    fn entries_for_user(&self, user_id: i64) -> Result<Vec<HistoryEntry>, HistoryError>;
}

/// Record `entry`, logging instead of failing. Returns the row id on success.
pub fn record_best_effort(recorder: &dyn HistoryRecorder, entry: &HistoryEntry) -> Option<i64> {
    match recorder.record(entry) {
        Ok(id) => {
            info!(
                "Conversion logged: {} -> {} (user_id={:?})",
                entry.filename, entry.operation, entry.user_id
            );
            Some(id)
        }
        Err(e) => {
            error!("Error logging conversion: {e}");
            None
        }
    }
}

// ── SQLite ───────────────────────────────────────────────────────────────

/// History in a SQLite `conversions` table.
pub struct SqliteHistory {
    conn: Mutex<Connection>,
}

impl SqliteHistory {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, HistoryError> {
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn create_schema(conn: &Connection) -> Result<(), HistoryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                conversion_type TEXT NOT NULL,
                output_file TEXT NOT NULL,
                user_id INTEGER,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_conversions_user ON conversions(user_id);
            "#,
        )?;
        // databases created before per-user history lack the column
        let has_user_id = conn
            .prepare("SELECT 1 FROM pragma_table_info('conversions') WHERE name = 'user_id'")?
            .query_row([], |_| Ok(()))
            .optional()?
            .is_some();
        if !has_user_id {
            conn.execute("ALTER TABLE conversions ADD COLUMN user_id INTEGER", [])?;
            debug!("Added user_id column to conversions table");
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, HistoryError> {
        self.conn
            .lock()
            .map_err(|e| HistoryError::Unavailable(e.to_string()))
    }
}

impl HistoryRecorder for SqliteHistory {
    fn record(&self, entry: &HistoryEntry) -> Result<i64, HistoryError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conversions (filename, conversion_type, output_file, user_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.filename,
                entry.operation.as_str(),
                entry.output_filename,
                entry.user_id,
                entry.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn entries_for_user(&self, user_id: i64) -> Result<Vec<HistoryEntry>, HistoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, filename, conversion_type, output_file, user_id, timestamp
             FROM conversions WHERE user_id = ?1
             ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, filename, kind, output_filename, user_id, stamp) = row?;
            let operation = kind
                .parse::<Operation>()
                .map_err(|_| HistoryError::UnknownOperation(kind.clone()))?;
            let timestamp = NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT)
                .map_err(|_| HistoryError::Timestamp(stamp.clone()))?
                .and_utc();
            entries.push(HistoryEntry {
                id: Some(id),
                filename,
                operation,
                output_filename,
                user_id,
                timestamp,
            });
        }
        Ok(entries)
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

/// History kept in a vector; for tests and deployments without a database.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryRecorder for MemoryHistory {
    fn record(&self, entry: &HistoryEntry) -> Result<i64, HistoryError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        let id = entries.len() as i64 + 1;
        entries.push(HistoryEntry {
            id: Some(id),
            ..entry.clone()
        });
        Ok(id)
    }

    fn entries_for_user(&self, user_id: i64) -> Result<Vec<HistoryEntry>, HistoryError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        let mut mine: Vec<HistoryEntry> = entries
            .iter()
            .filter(|e| e.user_id == Some(user_id))
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(mine)
    }
}
