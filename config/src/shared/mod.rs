mod base;
mod batch;
mod datastream;
mod importer;

pub use base::*;
pub use batch::*;
pub use datastream::*;
pub use importer::*;
