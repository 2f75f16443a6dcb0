//! Common types used throughout the datastream pipeline.
//!
//! Re-exports the entry and payload types that readers produce, transformers reshape and writers
//! annotate.

mod entry;

pub use entry::*;
