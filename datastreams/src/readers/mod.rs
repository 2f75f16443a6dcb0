//! Readers producing raw items from files, archives and remote services.
//!
//! Every reader declares through [`ReaderCapabilities`] whether it can open its own origin, be
//! chained after another reader, or both.

pub mod archive;
mod base;
pub mod formats;
pub mod http;
pub mod oaipmh;
pub mod rdf;
pub mod sparql;

pub use archive::{GzReader, TarReader, ZipReader};
pub use base::{Reader, ReaderCapabilities, ReaderStream};
pub use formats::{CsvReader, JsonLinesReader, JsonReader, XmlReader, YamlReader};
pub use http::{RorHttpReader, SimpleHttpReader};
pub use oaipmh::OaiPmhReader;
pub use rdf::RdfReader;
pub use sparql::SparqlReader;
