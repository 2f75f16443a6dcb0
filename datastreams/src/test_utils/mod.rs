//! Components and helpers for testing datastreams.
//!
//! Provides a reader yielding fixed values, a transformer rejecting negative numbers, a writer
//! refusing every write and a wrapper recording what a writer received.
pub mod components;
pub mod test_writer_wrapper;
