use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::types::{Blob, Payload};

/// Lazy sequence of raw items produced by a [`Reader`].
///
/// Entry-scoped errors (see [`crate::error::EtlError::is_entry_scoped`]) are reported for the
/// item being read and the stream may keep going; any other error ends the run.
pub type ReaderStream = BoxStream<'static, EtlResult<Payload>>;

/// Modes a reader can operate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderCapabilities {
    /// Can open its configured origin when no upstream item is given.
    pub root: bool,
    /// Can iterate sub-items of an item produced by the previous reader.
    pub chain: bool,
}

impl ReaderCapabilities {
    pub const ROOT_ONLY: ReaderCapabilities = ReaderCapabilities {
        root: true,
        chain: false,
    };

    pub const ROOT_AND_CHAIN: ReaderCapabilities = ReaderCapabilities {
        root: true,
        chain: true,
    };
}

/// Produces raw items from an origin or from an upstream item.
///
/// Implementations must be cheap to call repeatedly: in a chain, [`Reader::read`] is called once
/// per item yielded by the previous reader.
pub trait Reader: Send + Sync {
    /// Name used to tag errors raised while reading.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> ReaderCapabilities;

    fn read(&self, item: Option<Payload>) -> ReaderStream;
}

/// Resolves the bytes a file based reader works on.
///
/// A chained reader gets them from the upstream item, a root reader loads its `origin` file.
pub(crate) async fn load_blob(
    reader: &'static str,
    origin: Option<String>,
    item: Option<Payload>,
) -> EtlResult<Blob> {
    match item {
        Some(item) => item_to_blob(reader, item),
        None => {
            let Some(origin) = origin else {
                bail!(
                    ErrorKind::ConfigError,
                    "Reader has no origin to read from",
                    reader
                );
            };
            let data = tokio::fs::read(&origin).await?;

            Ok(Blob::named(origin, data))
        }
    }
}

/// Converts an upstream item into bytes. Text values are accepted as their UTF-8 encoding.
pub(crate) fn item_to_blob(reader: &'static str, item: Payload) -> EtlResult<Blob> {
    match item {
        Payload::Bytes(blob) => Ok(blob),
        Payload::Value(Value::String(text)) => Ok(Blob::new(Bytes::from(text))),
        Payload::Value(value) => bail!(
            ErrorKind::ReadFailed,
            "Reader expected bytes or text",
            format!("{reader} got {value}")
        ),
    }
}

/// Fails with a programming error when a reader is used in a mode it does not support.
pub(crate) fn unsupported_mode(reader: &'static str, chained: bool) -> ReaderStream {
    let mode = if chained { "chained" } else { "root" };
    let err = crate::etl_error!(
        ErrorKind::UnsupportedReaderMode,
        "Reader does not support this mode",
        format!("{reader} cannot be used as a {mode} reader")
    );

    Box::pin(futures::stream::once(async move { Err(err) }))
}
