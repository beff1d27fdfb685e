//! Remote record model

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::util::parse_timestamp;

/// Attribute mapping shared by remote and local records
pub type Attributes = serde_json::Map<String, Value>;

/// Identifier of a record on the remote side.
///
/// Remote APIs hand out numbers or strings; both are kept in their decimal or
/// literal text form so lookups compare like with like.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a remote ID from its text form
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read an ID out of a JSON value (string or integer)
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) if !text.trim().is_empty() => Some(Self(text.trim().to_string())),
            Value::Number(number) => Some(Self(number.to_string())),
            _ => None,
        }
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// JSON form stored under the local `id_key`
    pub fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RemoteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

macro_rules! remote_id_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for RemoteId {
                fn from(value: $ty) -> Self {
                    Self(value.to_string())
                }
            }
        )*
    };
}

remote_id_from_integer!(i32, i64, u32, u64);

/// One item of a remote collection, normalized for reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    /// Stable remote identifier
    pub id: RemoteId,
    /// Remote fields, the source of truth for local attributes
    pub attributes: Attributes,
    /// Last remote modification time, when the API reports it
    pub updated_at: Option<DateTime<Utc>>,
    /// Deletion marker reported by delta responses
    pub deleted_at: Option<DateTime<Utc>>,
    /// Nested collections keyed by association name
    pub associations: BTreeMap<String, Vec<RemoteRecord>>,
}

impl RemoteRecord {
    /// Create an empty remote record with the given ID
    pub fn new(id: impl Into<RemoteId>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
            updated_at: None,
            deleted_at: None,
            associations: BTreeMap::new(),
        }
    }

    /// Set a remote attribute
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Attach a nested collection for an association
    #[must_use]
    pub fn with_association(mut self, name: impl Into<String>, records: Vec<Self>) -> Self {
        self.associations.insert(name.into(), records);
        self
    }

    /// Mark the record as deleted remotely
    #[must_use]
    pub const fn with_deleted_at(mut self, deleted_at: DateTime<Utc>) -> Self {
        self.deleted_at = Some(deleted_at);
        self
    }

    /// Look up a remote attribute
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Whether the remote side reported this record as deleted
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Build a record from one JSON object of an API payload.
    ///
    /// `id` is required. `updated_at` and `deleted_at` are parsed when they
    /// hold RFC 3339 strings; every other field stays in `attributes`,
    /// including nested arrays that associations read lazily.
    pub fn from_json(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error::InvalidInput(
                "remote record must be a JSON object".to_string(),
            ));
        };

        let id = fields
            .remove("id")
            .as_ref()
            .and_then(RemoteId::from_value)
            .ok_or_else(|| Error::InvalidInput("remote record is missing an id".to_string()))?;

        let updated_at = fields
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp);
        let deleted_at = fields
            .get("deleted_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp);

        Ok(Self {
            id,
            attributes: fields,
            updated_at,
            deleted_at,
            associations: BTreeMap::new(),
        })
    }

    /// Nested collection for `name`.
    ///
    /// Explicitly attached associations win; otherwise an array stored under
    /// the same attribute name is parsed. `None` means the payload carried no
    /// data for the association at all, which is different from an empty list.
    pub fn association(&self, name: &str) -> Result<Option<Vec<Self>>> {
        if let Some(records) = self.associations.get(name) {
            return Ok(Some(records.clone()));
        }

        match self.attributes.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .cloned()
                .map(Self::from_json)
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(_) => Err(Error::InvalidInput(format!(
                "association `{name}` of remote record {} is not an array",
                self.id
            ))),
        }
    }

    /// Full payload snapshot, as stored under the local `data_key`
    pub fn to_json(&self) -> Value {
        let mut fields = self.attributes.clone();
        fields.insert("id".to_string(), self.id.to_value());
        for (name, records) in &self.associations {
            fields.insert(
                name.clone(),
                Value::Array(records.iter().map(Self::to_json).collect()),
            );
        }
        Value::Object(fields)
    }
}

/// A remote collection plus the out-of-band metadata of the response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteCollection {
    /// Records in the order the API returned them
    pub records: Vec<RemoteRecord>,
    /// IDs deleted since the requested watermark (delta responses only)
    pub deleted_ids: Option<Vec<RemoteId>>,
    /// Server-side sync time to use as the next watermark
    pub synced_at: Option<DateTime<Utc>>,
}

impl RemoteCollection {
    /// Create a collection from records
    pub const fn new(records: Vec<RemoteRecord>) -> Self {
        Self {
            records,
            deleted_ids: None,
            synced_at: None,
        }
    }

    /// Attach the explicit deletion list of a delta response
    #[must_use]
    pub fn with_deleted_ids(mut self, ids: impl IntoIterator<Item = RemoteId>) -> Self {
        self.deleted_ids = Some(ids.into_iter().collect());
        self
    }

    /// Attach the server-supplied sync time
    #[must_use]
    pub const fn with_synced_at(mut self, synced_at: DateTime<Utc>) -> Self {
        self.synced_at = Some(synced_at);
        self
    }

    /// Number of records in the collection
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the collection holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<RemoteRecord>> for RemoteCollection {
    fn from(records: Vec<RemoteRecord>) -> Self {
        Self::new(records)
    }
}
