use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::EtlError;

/// Raw bytes produced by a reader, e.g. an archive member or an HTTP response body.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob {
    /// Where the bytes come from (member name, URL, file path), used in error messages.
    pub name: Option<String>,
    pub data: Bytes,
}

impl Blob {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            name: None,
            data: data.into(),
        }
    }

    pub fn named(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: Some(name.into()),
            data: data.into(),
        }
    }

    /// Name used when reporting errors about this blob.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<bytes>")
    }
}

/// The data carried by a [`StreamEntry`].
///
/// Readers start with [`Payload::Bytes`] and parsing readers or transformers turn it into a
/// [`Payload::Value`].
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Bytes(Blob),
    Value(Value),
}

impl Payload {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Payload::Value(value) => Some(value),
            Payload::Bytes(_) => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Payload::Bytes(blob) => Some(blob),
            Payload::Value(_) => None,
        }
    }

    /// Returns a JSON view of the payload. Bytes are rendered as (lossy) UTF-8 text.
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Value(value) => value.clone(),
            Payload::Bytes(blob) => Value::String(String::from_utf8_lossy(&blob.data).into_owned()),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Value(value)
    }
}

impl From<Blob> for Payload {
    fn from(blob: Blob) -> Self {
        Payload::Bytes(blob)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Value(value) => write!(f, "{value}"),
            Payload::Bytes(blob) => write!(f, "{} ({} bytes)", blob.display_name(), blob.data.len()),
        }
    }
}

/// Operation performed by a writer for an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Created,
    Updated,
}

/// One unit of data flowing through a datastream, plus what happened to it so far.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEntry {
    pub entry: Payload,
    /// Persisted record, set by writers.
    pub record: Option<Value>,
    /// Ordered error descriptions; once non-empty the entry is only reported.
    pub errors: Vec<String>,
    pub filtered: bool,
    pub op_type: Option<OpType>,
    pub exc: Option<String>,
}

impl StreamEntry {
    pub fn new(entry: impl Into<Payload>) -> Self {
        Self {
            entry: entry.into(),
            record: None,
            errors: Vec::new(),
            filtered: false,
            op_type: None,
            exc: None,
        }
    }

    /// Creates an entry that already failed with `error`.
    pub fn errored(entry: impl Into<Payload>, error: impl Into<String>) -> Self {
        Self::new(entry).with_error(error)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the payload as JSON when it has been parsed.
    pub fn value(&self) -> Option<&Value> {
        self.entry.as_value()
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    /// Records `err` as raised by `stage`, formatted as `"<stage>: <message>"`.
    pub fn with_stage_error(self, stage: &str, err: &EtlError) -> Self {
        self.with_error(format!("{stage}: {}", err.message()))
    }

    pub fn with_payload(mut self, entry: impl Into<Payload>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn with_record(mut self, record: Value, op_type: Option<OpType>) -> Self {
        self.record = Some(record);
        self.op_type = op_type;
        self
    }

    pub fn into_filtered(mut self) -> Self {
        self.filtered = true;
        self
    }
}
