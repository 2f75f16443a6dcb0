//! Vocabulary datastreams.
//!
//! Reads vocabulary data from files, archives and remote services, reshapes it through
//! transformers and writes it to a record store, keeping failures attached to the entry that
//! caused them.

pub mod concurrency;
pub mod datastream;
pub mod error;
pub mod factories;
pub mod fixtures;
mod macros;
pub mod readers;
pub mod service;
pub mod tasks;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transformers;
pub mod types;
pub mod writers;
mod xml;
