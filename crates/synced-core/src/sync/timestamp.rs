//! Watermark strategies keyed by (scope, model)

use chrono::{DateTime, Utc};

use crate::db::{TimestampKey, TimestampRepository};
use crate::error::Result;
use crate::models::Scope;

/// Persists and retrieves a monotonic "last synchronized" watermark
pub trait TimestampStrategy {
    /// Highest watermark recorded for this strategy's key
    fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>>;

    /// Record `synced_at` if it is strictly newer than the current watermark.
    ///
    /// Returns whether a row was written; older or equal values are ignored
    /// so the watermark never regresses.
    fn update(&self, synced_at: DateTime<Utc>) -> Result<bool>;

    /// Delete every row of this strategy's key
    fn reset(&self) -> Result<usize>;
}

/// Watermark for one scope and model
pub struct ScopedTimestampStrategy<'a> {
    repo: &'a dyn TimestampRepository,
    scope: Scope,
    model: String,
}

impl<'a> ScopedTimestampStrategy<'a> {
    pub fn new(repo: &'a dyn TimestampRepository, scope: Scope, model: impl Into<String>) -> Self {
        Self {
            repo,
            scope,
            model: model.into(),
        }
    }

    fn key(&self) -> TimestampKey<'_> {
        TimestampKey::Scoped {
            scope: &self.scope,
            model: &self.model,
        }
    }
}

impl TimestampStrategy for ScopedTimestampStrategy<'_> {
    fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.repo.last_synced_at(&self.key())
    }

    fn update(&self, synced_at: DateTime<Utc>) -> Result<bool> {
        if self.last_synced_at()?.is_some_and(|latest| synced_at <= latest) {
            return Ok(false);
        }
        self.repo.insert(Some(&self.scope), &self.model, synced_at)?;
        Ok(true)
    }

    fn reset(&self) -> Result<usize> {
        self.repo.delete(&self.key())
    }
}

/// Watermark for a model across every scope
pub struct GlobalTimestampStrategy<'a> {
    repo: &'a dyn TimestampRepository,
    model: String,
}

impl<'a> GlobalTimestampStrategy<'a> {
    pub fn new(repo: &'a dyn TimestampRepository, model: impl Into<String>) -> Self {
        Self {
            repo,
            model: model.into(),
        }
    }

    fn key(&self) -> TimestampKey<'_> {
        TimestampKey::Model { model: &self.model }
    }
}

impl TimestampStrategy for GlobalTimestampStrategy<'_> {
    fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.repo.last_synced_at(&self.key())
    }

    fn update(&self, synced_at: DateTime<Utc>) -> Result<bool> {
        if self.last_synced_at()?.is_some_and(|latest| synced_at <= latest) {
            return Ok(false);
        }
        self.repo.insert(None, &self.model, synced_at)?;
        Ok(true)
    }

    fn reset(&self) -> Result<usize> {
        self.repo.delete(&self.key())
    }
}

/// Pick the scoped strategy when a scope is given, the global one otherwise
pub fn timestamp_strategy<'a>(
    repo: &'a dyn TimestampRepository,
    scope: Option<&Scope>,
    model: &str,
) -> Box<dyn TimestampStrategy + 'a> {
    match scope {
        Some(scope) => Box::new(ScopedTimestampStrategy::new(repo, scope.clone(), model)),
        None => Box::new(GlobalTimestampStrategy::new(repo, model)),
    }
}
