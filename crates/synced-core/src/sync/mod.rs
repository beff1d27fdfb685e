//! Remote → local synchronization

pub mod mapper;
mod result;
mod synchronizer;
pub mod timestamp;

pub use mapper::{DefaultMapper, FnMapper, Mapper, RenameMapper};
pub use result::{RecordError, RecordErrorKind, SyncOutcome, SyncResult};
pub use synchronizer::{SyncRequest, Synchronizer};
pub use timestamp::{
    timestamp_strategy, GlobalTimestampStrategy, ScopedTimestampStrategy, TimestampStrategy,
};
