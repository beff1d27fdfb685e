//! Model schema declarations

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Columns a local model exposes to the synchronizer.
///
/// The record store validates writes against these columns, and option
/// resolution consults them to pick default keys and the removal policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Model name
    pub name: String,
    /// Writable columns
    pub columns: BTreeSet<String>,
    /// Column set by `mark_missing`, when the model supports soft deletion
    pub missing_marker: Option<String>,
}

impl ModelSchema {
    /// Create a schema without columns
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeSet::new(),
            missing_marker: None,
        }
    }

    /// Add columns
    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Declare the soft-delete marker column (also added as a column)
    #[must_use]
    pub fn with_missing_marker(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.columns.insert(column.clone());
        self.missing_marker = Some(column);
        self
    }

    /// Check whether a column exists
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }
}
