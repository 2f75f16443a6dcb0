//! The record service contract consumed by the service writer.
//!
//! The real store lives outside of this crate. [`memory::MemoryRecordService`] backs tests,
//! fixtures and dry runs.

mod base;
pub mod memory;

pub use base::{BulkResult, IdStrategy, Identity, RecordId, RecordService, ServiceError};
pub use memory::MemoryRecordService;
