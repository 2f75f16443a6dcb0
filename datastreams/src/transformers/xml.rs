use serde::Deserialize;
use serde_json::Value;

use crate::error::{ErrorKind, EtlResult};
use crate::transformers::base::Transformer;
use crate::types::{Payload, StreamEntry};
use crate::{bail, etl_error, xml};

fn default_root_element() -> Option<String> {
    Some("record".to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlTransformerArgs {
    /// Element whose content becomes the entry. `null` keeps the whole document.
    #[serde(default = "default_root_element")]
    pub root_element: Option<String>,
}

impl Default for XmlTransformerArgs {
    fn default() -> Self {
        Self {
            root_element: default_root_element(),
        }
    }
}

/// Parses XML entries into mappings.
///
/// Accepts raw bytes, a text value, or a mapping holding the document under `"record"` (as
/// produced by the OAI-PMH reader).
#[derive(Debug, Clone)]
pub struct XmlTransformer {
    root_element: Option<String>,
}

impl XmlTransformer {
    pub const NAME: &'static str = "XmlTransformer";

    pub fn new(args: XmlTransformerArgs) -> Self {
        Self {
            root_element: args.root_element,
        }
    }

    fn document(entry: &Payload) -> EtlResult<String> {
        match entry {
            Payload::Bytes(blob) => Ok(String::from_utf8_lossy(&blob.data).into_owned()),
            Payload::Value(Value::String(text)) => Ok(text.clone()),
            Payload::Value(Value::Object(map)) => match map.get("record") {
                Some(Value::String(text)) => Ok(text.clone()),
                _ => bail!(
                    ErrorKind::MissingField,
                    "XML document not found in entry"
                ),
            },
            Payload::Value(_) => bail!(
                ErrorKind::TransformationFailed,
                "Entry is not an XML document"
            ),
        }
    }
}

impl Transformer for XmlTransformer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, entry: &StreamEntry) -> EtlResult<StreamEntry> {
        let text = Self::document(&entry.entry)?;
        let root = xml::parse_document(&text).map_err(|err| {
            etl_error!(ErrorKind::TransformationFailed, "Invalid XML entry", err)
        })?;

        let value = match &self.root_element {
            Some(name) => match root.find_all(name).first() {
                Some(element) => element.to_value(),
                None => bail!(
                    ErrorKind::MissingField,
                    "Record not found in XML entry",
                    name
                ),
            },
            None => root.to_document(),
        };

        Ok(entry.clone().with_payload(value))
    }
}
