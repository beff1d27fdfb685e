//! Database layer for synced

mod connection;
mod migrations;
mod record_repository;
mod timestamp_repository;

pub use connection::Database;
pub use record_repository::{RecordStore, SqliteRecordStore};
pub use timestamp_repository::{SqliteTimestampRepository, TimestampKey, TimestampRepository};
