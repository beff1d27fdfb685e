//! Local record model

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::remote::{Attributes, RemoteId};

/// Primary key of a record in the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Wrap a raw row ID
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw row ID
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local-collection boundary a synchronization runs within.
///
/// A scope points at a parent record (for example the account owning a set
/// of rentals). Synchronizing without a scope covers every record of the
/// model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    /// Model name of the parent record
    pub model: String,
    /// Parent record ID
    pub id: RecordId,
}

impl Scope {
    /// Create a scope from a model name and record ID
    pub fn new(model: impl Into<String>, id: RecordId) -> Self {
        Self {
            model: model.into(),
            id,
        }
    }

    /// Scope rooted at an existing local record
    pub fn of(record: &LocalRecord) -> Self {
        Self::new(record.model.clone(), record.id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model, self.id)
    }
}

/// A record persisted in the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Store-assigned identifier
    pub id: RecordId,
    /// Model (table) name
    pub model: String,
    /// Parent scope, if the record belongs to one
    pub scope: Option<Scope>,
    /// Model-specific columns, including the remote ID under `id_key`
    pub attributes: Attributes,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl LocalRecord {
    /// Look up a column value
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Remote ID mirrored under `id_key`, if set
    pub fn remote_id(&self, id_key: &str) -> Option<RemoteId> {
        self.attributes.get(id_key).and_then(RemoteId::from_value)
    }

    /// Whether the soft-delete `marker` column holds a value
    pub fn is_marked_missing(&self, marker: &str) -> bool {
        self.attributes.get(marker).is_some_and(|value| !value.is_null())
    }

    /// Whether writing `attributes` would change any stored column
    pub fn differs_from(&self, attributes: &Attributes) -> bool {
        attributes
            .iter()
            .any(|(name, value)| self.attributes.get(name) != Some(value))
    }
}
