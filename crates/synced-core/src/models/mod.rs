//! Data models for synced

mod record;
mod remote;
mod schema;
mod timestamp;

pub use record::{LocalRecord, RecordId, Scope};
pub use remote::{Attributes, RemoteCollection, RemoteId, RemoteRecord};
pub use schema::ModelSchema;
pub use timestamp::SyncTimestamp;
