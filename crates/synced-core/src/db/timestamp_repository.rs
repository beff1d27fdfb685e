//! Synchronization timestamp repository implementation

use crate::error::Result;
use crate::models::{RecordId, Scope, SyncTimestamp};
use crate::util::{from_millis, from_nanos, to_millis, to_nanos};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};

/// Which watermark rows an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKey<'a> {
    /// Rows recorded for exactly this scope and model
    Scoped { scope: &'a Scope, model: &'a str },
    /// Every row of the model, whatever scope it was recorded under
    Model { model: &'a str },
}

impl TimestampKey<'_> {
    /// `WHERE` clause and parameters selecting this key's rows
    fn filter(&self) -> (&'static str, Vec<SqlValue>) {
        match self {
            Self::Scoped { scope, model } => (
                "model_name = ? AND scope_model = ? AND scope_id = ?",
                vec![
                    SqlValue::Text((*model).to_string()),
                    SqlValue::Text(scope.model.clone()),
                    SqlValue::Integer(scope.id.get()),
                ],
            ),
            Self::Model { model } => ("model_name = ?", vec![SqlValue::Text((*model).to_string())]),
        }
    }
}

/// Trait for watermark persistence
pub trait TimestampRepository {
    /// Highest `synced_at` recorded for the key
    fn last_synced_at(&self, key: &TimestampKey<'_>) -> Result<Option<DateTime<Utc>>>;

    /// Record a watermark row
    fn insert(
        &self,
        scope: Option<&Scope>,
        model: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<SyncTimestamp>;

    /// Delete every row matching the key, returning how many were removed
    fn delete(&self, key: &TimestampKey<'_>) -> Result<usize>;

    /// Rows matching the key, newest watermark first
    fn list(&self, key: &TimestampKey<'_>) -> Result<Vec<SyncTimestamp>>;
}

/// `SQLite` implementation of `TimestampRepository`
pub struct SqliteTimestampRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTimestampRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a timestamp row
    fn parse_timestamp(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncTimestamp> {
        let scope_model: Option<String> = row.get(1)?;
        let scope_id: Option<i64> = row.get(2)?;

        Ok(SyncTimestamp {
            id: row.get(0)?,
            scope: scope_model
                .zip(scope_id)
                .map(|(model, id)| Scope::new(model, RecordId::new(id))),
            model: row.get(3)?,
            synced_at: from_nanos(row.get(4)?),
            created_at: from_millis(row.get(5)?),
        })
    }
}

impl TimestampRepository for SqliteTimestampRepository<'_> {
    fn last_synced_at(&self, key: &TimestampKey<'_>) -> Result<Option<DateTime<Utc>>> {
        let (filter, values) = key.filter();
        let latest: Option<i64> = self.conn.query_row(
            &format!("SELECT MAX(synced_at) FROM synced_timestamps WHERE {filter}"),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        Ok(latest.map(from_nanos))
    }

    fn insert(
        &self,
        scope: Option<&Scope>,
        model: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<SyncTimestamp> {
        let created_at = Utc::now();
        let synced_nanos = to_nanos(synced_at)?;

        self.conn.execute(
            "INSERT INTO synced_timestamps (scope_model, scope_id, model_name, synced_at, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                scope.map(|scope| scope.model.as_str()),
                scope.map(|scope| scope.id.get()),
                model,
                synced_nanos,
                to_millis(created_at)
            ],
        )?;

        Ok(SyncTimestamp {
            id: self.conn.last_insert_rowid(),
            scope: scope.cloned(),
            model: model.to_string(),
            synced_at,
            created_at: from_millis(to_millis(created_at)),
        })
    }

    fn delete(&self, key: &TimestampKey<'_>) -> Result<usize> {
        let (filter, values) = key.filter();
        let rows = self.conn.execute(
            &format!("DELETE FROM synced_timestamps WHERE {filter}"),
            params_from_iter(values),
        )?;
        Ok(rows)
    }

    fn list(&self, key: &TimestampKey<'_>) -> Result<Vec<SyncTimestamp>> {
        let (filter, values) = key.filter();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, scope_model, scope_id, model_name, synced_at, created_at
             FROM synced_timestamps
             WHERE {filter}
             ORDER BY synced_at DESC, id DESC"
        ))?;

        let rows = stmt
            .query_map(params_from_iter(values), Self::parse_timestamp)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }
}
