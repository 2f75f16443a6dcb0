//! Configuration management for vocabulary datastreams.
//!
//! Provides environment detection, hierarchical configuration loading from YAML files and
//! environment variables, and the shared configuration types describing a datastream (readers,
//! transformers, writers and batching options).

mod environment;
mod load;
pub mod shared;

pub use environment::*;
pub use load::*;
