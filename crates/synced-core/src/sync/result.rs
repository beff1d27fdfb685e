//! Per-run synchronization report

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::models::RemoteId;

/// How a run ended, when it was not aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Every record was reconciled
    Succeeded,
    /// The run completed but some records failed
    PartiallySucceeded,
}

/// Which step failed for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordErrorKind {
    Mapping,
    Persistence,
}

/// One record that could not be reconciled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    pub model: String,
    /// Remote ID of the failing record, when it has one
    pub remote_id: Option<RemoteId>,
    pub kind: RecordErrorKind,
    pub message: String,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.remote_id {
            Some(id) => write!(f, "{} {id}: {}", self.model, self.message),
            None => write!(f, "{}: {}", self.model, self.message),
        }
    }
}

/// Counts for one model, plus the totals of each association
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub model: String,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub errors: Vec<RecordError>,
    /// Accumulated results of every nested run, by association name
    pub associations: BTreeMap<String, SyncResult>,
}

impl SyncResult {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Add a nested run's counts to this report's entry for `association`
    pub fn merge_association(&mut self, association: &str, nested: Self) {
        match self.associations.get_mut(association) {
            Some(existing) => existing.absorb(nested),
            None => {
                self.associations.insert(association.to_string(), nested);
            }
        }
    }

    fn absorb(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.removed += other.removed;
        self.errors.extend(other.errors);
        for (name, nested) in other.associations {
            self.merge_association(&name, nested);
        }
    }

    /// Record errors here and in every association
    pub fn error_count(&self) -> usize {
        self.errors.len()
            + self
                .associations
                .values()
                .map(Self::error_count)
                .sum::<usize>()
    }

    /// Every record error, this model's first
    pub fn all_errors(&self) -> Vec<&RecordError> {
        let mut errors: Vec<&RecordError> = self.errors.iter().collect();
        for nested in self.associations.values() {
            errors.extend(nested.all_errors());
        }
        errors
    }

    pub fn outcome(&self) -> SyncOutcome {
        if self.error_count() == 0 {
            SyncOutcome::Succeeded
        } else {
            SyncOutcome::PartiallySucceeded
        }
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} created, {} updated, {} unchanged, {} removed",
            self.model, self.created, self.updated, self.unchanged, self.removed
        )?;
        if !self.errors.is_empty() {
            write!(f, ", {} failed", self.errors.len())?;
        }
        Ok(())
    }
}
