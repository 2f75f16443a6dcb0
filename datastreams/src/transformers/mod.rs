//! Transformers reshaping entries between reading and writing.

mod base;
pub mod ror;
pub mod xml;

pub use base::Transformer;
pub use ror::RorTransformer;
pub use xml::XmlTransformer;
