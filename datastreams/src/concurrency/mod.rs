//! Stream adapters and shutdown signalling.

pub mod shutdown;
pub mod stream;
