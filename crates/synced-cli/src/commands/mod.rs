pub mod common;
pub mod records;
pub mod sync;
pub mod timestamps;
