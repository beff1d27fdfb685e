//! Record store implementation

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::{Attributes, LocalRecord, ModelSchema, RecordId, RemoteId, Scope};
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;

/// Trait for the local record operations the synchronizer issues.
///
/// The store alone decides how a scope filters records and how the
/// soft-delete marker is named.
pub trait RecordStore {
    /// Whether `model` exposes a writable column named `column`
    fn has_column(&self, model: &str, column: &str) -> bool;

    /// Column `mark_missing` sets for `model`, if the model supports it
    fn missing_marker(&self, model: &str) -> Option<String>;

    /// Records in scope whose `id_key` matches one of `ids`
    fn find_by_ids(
        &self,
        scope: Option<&Scope>,
        model: &str,
        id_key: &str,
        ids: &[RemoteId],
    ) -> Result<Vec<LocalRecord>>;

    /// Every record in scope whose `id_key` is set
    fn find_all_in_scope(
        &self,
        scope: Option<&Scope>,
        model: &str,
        id_key: &str,
    ) -> Result<Vec<LocalRecord>>;

    /// Create a record in scope
    fn create(
        &self,
        scope: Option<&Scope>,
        model: &str,
        attributes: Attributes,
    ) -> Result<LocalRecord>;

    /// Merge `attributes` into an existing record
    fn update(&self, record: &LocalRecord, attributes: Attributes) -> Result<LocalRecord>;

    /// Permanently remove a record
    fn delete(&self, record: &LocalRecord) -> Result<()>;

    /// Soft-delete a record by setting its missing marker
    fn mark_missing(&self, record: &LocalRecord) -> Result<LocalRecord>;
}

const RECORD_COLUMNS: &str = "id, model, scope_model, scope_id, attributes, created_at, updated_at";

/// `SQLite` implementation of `RecordStore`
pub struct SqliteRecordStore<'a> {
    conn: &'a Connection,
    schemas: HashMap<String, ModelSchema>,
}

impl<'a> SqliteRecordStore<'a> {
    /// Create a new store with the given connection and no models
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            schemas: HashMap::new(),
        }
    }

    /// Declare a model the store accepts
    #[must_use]
    pub fn with_model(mut self, schema: ModelSchema) -> Self {
        self.schemas.insert(schema.name.clone(), schema);
        self
    }

    /// Declare several models
    #[must_use]
    pub fn with_models(self, schemas: impl IntoIterator<Item = ModelSchema>) -> Self {
        schemas.into_iter().fold(self, Self::with_model)
    }

    /// List every record of a model in scope, including unsynced ones
    pub fn list(&self, scope: Option<&Scope>, model: &str) -> Result<Vec<LocalRecord>> {
        let (mut sql, values) = Self::scoped_query(scope, model);
        sql.push_str(" ORDER BY id");
        self.query(&sql, values)
    }

    /// Get a record by ID
    pub fn get(&self, id: RecordId) -> Result<Option<LocalRecord>> {
        let records = self.query(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
            vec![SqlValue::Integer(id.get())],
        )?;
        Ok(records.into_iter().next())
    }

    fn schema(&self, model: &str) -> Result<&ModelSchema> {
        self.schemas.get(model).ok_or_else(|| Error::Validation {
            model: model.to_string(),
            message: "model is not declared in the record store".to_string(),
        })
    }

    /// Reject attributes naming undeclared columns
    fn validate(&self, model: &str, attributes: &Attributes) -> Result<()> {
        let schema = self.schema(model)?;
        if let Some(unknown) = attributes.keys().find(|name| !schema.has_column(name)) {
            return Err(Error::Validation {
                model: model.to_string(),
                message: format!("unknown attribute `{unknown}`"),
            });
        }
        Ok(())
    }

    /// Base `SELECT` for a model, restricted to `scope` when one is given
    fn scoped_query(scope: Option<&Scope>, model: &str) -> (String, Vec<SqlValue>) {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE model = ?");
        let mut values = vec![SqlValue::Text(model.to_string())];

        if let Some(scope) = scope {
            sql.push_str(" AND scope_model = ? AND scope_id = ?");
            values.push(SqlValue::Text(scope.model.clone()));
            values.push(SqlValue::Integer(scope.id.get()));
        }

        (sql, values)
    }

    fn query(&self, sql: &str, values: Vec<SqlValue>) -> Result<Vec<LocalRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt
            .query_map(params_from_iter(values), Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<LocalRecord> {
        let scope_model: Option<String> = row.get(2)?;
        let scope_id: Option<i64> = row.get(3)?;
        let raw_attributes: String = row.get(4)?;
        let attributes = serde_json::from_str::<Attributes>(&raw_attributes).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(LocalRecord {
            id: RecordId::new(row.get(0)?),
            model: row.get(1)?,
            scope: scope_model
                .zip(scope_id)
                .map(|(model, id)| Scope::new(model, RecordId::new(id))),
            attributes,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

/// Remote IDs bound per `IN (...)` lookup; `SQLite` caps bound parameters
const ID_CHUNK_SIZE: usize = 500;

/// JSON path addressing a top-level attribute.
///
/// `SQLite` has no escape for `"` inside a quoted label, so keys containing
/// one are rejected when options are resolved.
fn json_path(key: &str) -> String {
    format!("$.\"{key}\"")
}

impl RecordStore for SqliteRecordStore<'_> {
    fn has_column(&self, model: &str, column: &str) -> bool {
        self.schemas
            .get(model)
            .is_some_and(|schema| schema.has_column(column))
    }

    fn missing_marker(&self, model: &str) -> Option<String> {
        self.schemas
            .get(model)
            .and_then(|schema| schema.missing_marker.clone())
    }

    fn find_by_ids(
        &self,
        scope: Option<&Scope>,
        model: &str,
        id_key: &str,
        ids: &[RemoteId],
    ) -> Result<Vec<LocalRecord>> {
        let mut records = Vec::new();
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let (mut sql, mut values) = Self::scoped_query(scope, model);
            let placeholders = vec!["?"; chunk.len()].join(", ");
            sql.push_str(&format!(
                " AND CAST(json_extract(attributes, ?) AS TEXT) IN ({placeholders})"
            ));
            values.push(SqlValue::Text(json_path(id_key)));
            values.extend(chunk.iter().map(|id| SqlValue::Text(id.as_str().to_string())));
            records.extend(self.query(&sql, values)?);
        }

        records.sort_by_key(|record| record.id);
        records.dedup_by_key(|record| record.id);
        Ok(records)
    }

    fn find_all_in_scope(
        &self,
        scope: Option<&Scope>,
        model: &str,
        id_key: &str,
    ) -> Result<Vec<LocalRecord>> {
        let (mut sql, mut values) = Self::scoped_query(scope, model);
        sql.push_str(" AND json_extract(attributes, ?) IS NOT NULL ORDER BY id");
        values.push(SqlValue::Text(json_path(id_key)));

        self.query(&sql, values)
    }

    fn create(
        &self,
        scope: Option<&Scope>,
        model: &str,
        attributes: Attributes,
    ) -> Result<LocalRecord> {
        self.validate(model, &attributes)?;
        let now = Utc::now().timestamp_millis();

        self.conn.execute(
            "INSERT INTO records (model, scope_model, scope_id, attributes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                model,
                scope.map(|scope| scope.model.as_str()),
                scope.map(|scope| scope.id.get()),
                serde_json::to_string(&attributes)?,
                now,
                now
            ],
        )?;

        Ok(LocalRecord {
            id: RecordId::new(self.conn.last_insert_rowid()),
            model: model.to_string(),
            scope: scope.cloned(),
            attributes,
            created_at: now,
            updated_at: now,
        })
    }

    fn update(&self, record: &LocalRecord, attributes: Attributes) -> Result<LocalRecord> {
        self.validate(&record.model, &attributes)?;
        let now = Utc::now().timestamp_millis();

        let mut merged = record.attributes.clone();
        merged.extend(attributes);

        let rows = self.conn.execute(
            "UPDATE records SET attributes = ?, updated_at = ? WHERE id = ?",
            params![serde_json::to_string(&merged)?, now, record.id.get()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{} {}", record.model, record.id)));
        }

        Ok(LocalRecord {
            attributes: merged,
            updated_at: now,
            ..record.clone()
        })
    }

    fn delete(&self, record: &LocalRecord) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM records WHERE id = ?", params![record.id.get()])?;

        if rows == 0 {
            return Err(Error::NotFound(format!("{} {}", record.model, record.id)));
        }

        Ok(())
    }

    fn mark_missing(&self, record: &LocalRecord) -> Result<LocalRecord> {
        let marker = self
            .schema(&record.model)?
            .missing_marker
            .clone()
            .ok_or_else(|| Error::Validation {
                model: record.model.clone(),
                message: "model has no missing marker column".to_string(),
            })?;

        let mut attributes = Attributes::new();
        attributes.insert(
            marker,
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        self.update(record, attributes)
    }
}
