//! Synchronization timestamp model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::Scope;

/// One recorded watermark row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTimestamp {
    /// Row identifier
    pub id: i64,
    /// Scope the row was recorded for; `None` for global rows
    pub scope: Option<Scope>,
    /// Synchronized model
    pub model: String,
    /// Watermark value
    pub synced_at: DateTime<Utc>,
    /// When the row was written
    pub created_at: DateTime<Utc>,
}
