//! synced-core - Core library for synced
//!
//! Reconciles collections of remote records (fetched from an external API)
//! with a local record store: creates new records, updates changed ones,
//! removes or marks the ones that disappeared remotely, and recurses into
//! nested associations. A per-(scope, model) watermark enables delta syncs.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod sync;
pub mod util;

pub use config::{ModelRegistry, RemovePolicy, SyncOptions, SyncOverrides, SyncedConfig};
pub use error::{Error, Result};
pub use models::{
    Attributes, LocalRecord, ModelSchema, RecordId, RemoteCollection, RemoteId, RemoteRecord,
    Scope, SyncTimestamp,
};
pub use sync::{SyncOutcome, SyncRequest, SyncResult, Synchronizer};
