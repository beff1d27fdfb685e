//! Where remote collections come from

mod http;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{RemoteCollection, Scope};

pub use http::{parse_collection, HttpSource};

/// What the synchronizer asks a source for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest<'a> {
    /// Model being synchronized
    pub model: &'a str,
    /// Endpoint configured for the model
    pub endpoint: &'a str,
    /// Local scope of the run, if any
    pub scope: Option<&'a Scope>,
    /// Watermark of a delta sync; `None` requests the full collection
    pub updated_since: Option<DateTime<Utc>>,
}

/// Fetcher capability handed to the synchronizer.
///
/// A source that honors `updated_since` returns only records changed since
/// then, plus the IDs deleted in that window when it knows them.
pub trait RemoteSource {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<RemoteCollection>;
}
