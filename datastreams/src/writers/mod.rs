//! Writers persisting transformed entries.

pub mod async_writer;
mod base;
pub mod service;
pub mod yaml;

pub use async_writer::AsyncWriter;
pub use base::Writer;
pub use service::ServiceWriter;
pub use yaml::YamlWriter;
