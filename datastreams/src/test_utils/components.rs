use async_trait::async_trait;
use async_stream::stream;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::error::{ErrorKind, EtlResult};
use crate::factories::{Registry, parse_args};
use crate::readers::{Reader, ReaderCapabilities, ReaderStream};
use crate::transformers::Transformer;
use crate::types::{Payload, StreamEntry};
use crate::writers::Writer;
use crate::{bail, etl_error};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestReaderArgs {
    #[serde(default)]
    pub origin: Vec<Value>,
}

/// Yields the values it was created with.
#[derive(Debug, Clone)]
pub struct TestReader {
    values: Vec<Value>,
}

impl TestReader {
    pub const NAME: &'static str = "TestReader";

    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl Reader for TestReader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn capabilities(&self) -> ReaderCapabilities {
        ReaderCapabilities::ROOT_ONLY
    }

    fn read(&self, item: Option<Payload>) -> ReaderStream {
        let values = self.values.clone();

        Box::pin(stream! {
            if item.is_some() {
                yield Err(etl_error!(
                    ErrorKind::UnsupportedReaderMode,
                    "Reader cannot be chained",
                    Self::NAME
                ));
                return;
            }

            for value in values {
                yield Ok(Payload::Value(value));
            }
        })
    }
}

/// Adds one to numbers, rejecting negative ones.
#[derive(Debug, Clone, Copy)]
pub struct TestTransformer;

impl TestTransformer {
    pub const NAME: &'static str = "TestTransformer";
}

impl Transformer for TestTransformer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, entry: &StreamEntry) -> EtlResult<StreamEntry> {
        let Some(value) = entry.value().and_then(Value::as_i64) else {
            bail!(ErrorKind::TransformationFailed, "Value is not a number");
        };
        if value < 0 {
            bail!(ErrorKind::TransformationFailed, "Value cannot be negative");
        }

        Ok(entry.clone().with_payload(Value::from(value + 1)))
    }
}

/// Passes entries through unchanged, remembering every payload it was applied to.
///
/// Clones share the remembered payloads.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransformer {
    seen: Arc<Mutex<Vec<Payload>>>,
}

impl RecordingTransformer {
    pub const NAME: &'static str = "RecordingTransformer";

    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads the transformer was applied to, in order.
    pub fn seen(&self) -> Vec<Payload> {
        match self.seen.lock() {
            Ok(seen) => seen.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Transformer for RecordingTransformer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, entry: &StreamEntry) -> EtlResult<StreamEntry> {
        match self.seen.lock() {
            Ok(mut seen) => seen.push(entry.entry.clone()),
            Err(poisoned) => poisoned.into_inner().push(entry.entry.clone()),
        }

        Ok(entry.clone())
    }
}

/// Refuses every write with a writer error.
#[derive(Debug, Clone, Copy)]
pub struct FailingWriter;

impl FailingWriter {
    pub const NAME: &'static str = "FailingWriter";
}

#[async_trait]
impl Writer for FailingWriter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn write(&self, entry: &StreamEntry) -> EtlResult<StreamEntry> {
        bail!(ErrorKind::WriteFailed, "Write refused", entry.entry);
    }

    async fn write_many(&self, entries: Vec<StreamEntry>) -> EtlResult<Vec<StreamEntry>> {
        bail!(
            ErrorKind::WriteFailed,
            "Batch refused",
            format!("{} entries", entries.len())
        );
    }
}

/// Panics on every write.
#[derive(Debug, Clone, Copy)]
pub struct PanickingWriter;

impl PanickingWriter {
    pub const NAME: &'static str = "PanickingWriter";
}

#[async_trait]
impl Writer for PanickingWriter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn write(&self, entry: &StreamEntry) -> EtlResult<StreamEntry> {
        panic!("writer panicked on {}", entry.entry);
    }

    async fn write_many(&self, entries: Vec<StreamEntry>) -> EtlResult<Vec<StreamEntry>> {
        panic!("writer panicked on {} entries", entries.len());
    }
}

/// Registers the test components as `test` (reader and transformer), `fail` and `panic` (writers).
pub fn register_test_components(registry: &mut Registry) {
    registry.register_reader("test", |args, _| {
        let args: TestReaderArgs = parse_args("Reader", "test", args)?;
        Ok(Box::new(TestReader::new(args.origin)))
    });
    registry.register_transformer("test", |_, _| Ok(Box::new(TestTransformer)));
    registry.register_writer("fail", |_, _| Ok(Box::new(FailingWriter)));
    registry.register_writer("panic", |_, _| Ok(Box::new(PanickingWriter)));
}
