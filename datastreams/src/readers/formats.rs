use async_stream::stream;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ErrorKind, EtlResult};
use crate::readers::base::{Reader, ReaderCapabilities, ReaderStream, load_blob};
use crate::types::{Blob, Payload};
use crate::{etl_error, xml};

/// Arguments of the readers that only need an optional origin.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileReaderArgs {
    #[serde(default)]
    pub origin: Option<String>,
}

fn decoding_error(blob: &Blob, err: impl std::fmt::Display) -> crate::error::EtlError {
    etl_error!(
        ErrorKind::DecodingError,
        "Could not decode content",
        format!("{}: {err}", blob.display_name())
    )
}

/// Splits a parsed document into entries: every element of a top-level list, or the value itself.
fn into_entries(value: Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values,
        value => vec![value],
    }
}

/// Implements [`Reader`] for a reader that turns one blob into a list of parsed values.
macro_rules! blob_parsing_reader {
    ($reader:ty, $parse:expr) => {
        impl Reader for $reader {
            fn name(&self) -> &'static str {
                Self::NAME
            }

            fn capabilities(&self) -> ReaderCapabilities {
                ReaderCapabilities::ROOT_AND_CHAIN
            }

            fn read(&self, item: Option<Payload>) -> ReaderStream {
                let this = self.clone();
                let origin = this.origin.clone();

                Box::pin(stream! {
                    let blob = match load_blob(Self::NAME, origin, item).await {
                        Ok(blob) => blob,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };

                    let parse: fn(&$reader, &Blob) -> Vec<EtlResult<Value>> = $parse;
                    for value in parse(&this, &blob) {
                        yield value.map(Payload::Value);
                    }
                })
            }
        }
    };
}

/// Parses a JSON document, yielding each element of a top-level list.
#[derive(Debug, Clone)]
pub struct JsonReader {
    origin: Option<String>,
}

impl JsonReader {
    pub const NAME: &'static str = "JsonReader";

    pub fn new(args: FileReaderArgs) -> Self {
        Self {
            origin: args.origin,
        }
    }

    fn parse(&self, blob: &Blob) -> Vec<EtlResult<Value>> {
        match serde_json::from_slice::<Value>(&blob.data) {
            Ok(value) => into_entries(value).into_iter().map(Ok).collect(),
            Err(err) => vec![Err(decoding_error(blob, err))],
        }
    }
}

blob_parsing_reader!(JsonReader, JsonReader::parse);

/// Parses one JSON value per non-empty line. Malformed lines are reported individually.
#[derive(Debug, Clone)]
pub struct JsonLinesReader {
    origin: Option<String>,
}

impl JsonLinesReader {
    pub const NAME: &'static str = "JsonLinesReader";

    pub fn new(args: FileReaderArgs) -> Self {
        Self {
            origin: args.origin,
        }
    }

    fn parse(&self, blob: &Blob) -> Vec<EtlResult<Value>> {
        String::from_utf8_lossy(&blob.data)
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str::<Value>(line).map_err(|err| {
                    etl_error!(
                        ErrorKind::DecodingError,
                        "Could not decode content",
                        format!("{} line {}: {err}", blob.display_name(), number + 1)
                    )
                })
            })
            .collect()
    }
}

blob_parsing_reader!(JsonLinesReader, JsonLinesReader::parse);

/// Parses a YAML document, yielding each element of a top-level list. Empty documents yield
/// nothing.
#[derive(Debug, Clone)]
pub struct YamlReader {
    origin: Option<String>,
}

impl YamlReader {
    pub const NAME: &'static str = "YamlReader";

    pub fn new(args: FileReaderArgs) -> Self {
        Self {
            origin: args.origin,
        }
    }

    fn parse(&self, blob: &Blob) -> Vec<EtlResult<Value>> {
        if blob.data.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }

        match serde_yaml::from_slice::<Value>(&blob.data) {
            Ok(Value::Null) => Vec::new(),
            Ok(value) => into_entries(value).into_iter().map(Ok).collect(),
            Err(err) => vec![Err(decoding_error(blob, err))],
        }
    }
}

blob_parsing_reader!(YamlReader, YamlReader::parse);

fn default_delimiter() -> char {
    ','
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvReaderArgs {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl Default for CsvReaderArgs {
    fn default() -> Self {
        Self {
            origin: None,
            delimiter: default_delimiter(),
        }
    }
}

/// Parses a CSV file with a header row into one mapping per record.
#[derive(Debug, Clone)]
pub struct CsvReader {
    origin: Option<String>,
    delimiter: u8,
}

impl CsvReader {
    pub const NAME: &'static str = "CsvReader";

    pub fn new(args: CsvReaderArgs) -> EtlResult<Self> {
        let delimiter = u8::try_from(args.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                etl_error!(
                    ErrorKind::InvalidComponentArgs,
                    "CSV delimiter must be a single ASCII character",
                    args.delimiter
                )
            })?;

        Ok(Self {
            origin: args.origin,
            delimiter,
        })
    }

    fn parse(&self, blob: &Blob) -> Vec<EtlResult<Value>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .from_reader(&blob.data[..]);

        let headers = match reader.headers() {
            Ok(headers) => headers.clone(),
            Err(err) => return vec![Err(decoding_error(blob, err))],
        };

        reader
            .records()
            .map(|record| {
                let record = record.map_err(|err| decoding_error(blob, err))?;
                let row: Map<String, Value> = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(header, field)| (header.to_string(), Value::String(field.to_string())))
                    .collect();

                Ok(Value::Object(row))
            })
            .collect()
    }
}

blob_parsing_reader!(CsvReader, CsvReader::parse);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlReaderArgs {
    #[serde(default)]
    pub origin: Option<String>,
    /// Yield one mapping per element with this name instead of the whole document.
    #[serde(default)]
    pub root_element: Option<String>,
}

/// Parses an XML document into mappings.
#[derive(Debug, Clone)]
pub struct XmlReader {
    origin: Option<String>,
    root_element: Option<String>,
}

impl XmlReader {
    pub const NAME: &'static str = "XmlReader";

    pub fn new(args: XmlReaderArgs) -> Self {
        Self {
            origin: args.origin,
            root_element: args.root_element,
        }
    }

    fn parse(&self, blob: &Blob) -> Vec<EtlResult<Value>> {
        let text = String::from_utf8_lossy(&blob.data);
        let root = match xml::parse_document(&text) {
            Ok(root) => root,
            Err(err) => return vec![Err(decoding_error(blob, err))],
        };

        match &self.root_element {
            Some(name) => root
                .find_all(name)
                .into_iter()
                .map(|element| Ok(element.to_value()))
                .collect(),
            None => vec![Ok(root.to_document())],
        }
    }
}

blob_parsing_reader!(XmlReader, XmlReader::parse);

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    async fn read_all(reader: &dyn Reader, content: &str) -> Vec<EtlResult<Payload>> {
        reader
            .read(Some(Payload::Bytes(Blob::named("input", content.to_string()))))
            .collect()
            .await
    }

    fn values(results: Vec<EtlResult<Payload>>) -> Vec<Value> {
        results
            .into_iter()
            .map(|result| result.unwrap().as_value().unwrap().clone())
            .collect()
    }

    #[tokio::test]
    async fn json_splits_top_level_lists() {
        let reader = JsonReader::new(FileReaderArgs::default());

        assert_eq!(
            values(read_all(&reader, r#"[{"id": "a"}, {"id": "b"}]"#).await),
            vec![json!({"id": "a"}), json!({"id": "b"})]
        );
        assert_eq!(
            values(read_all(&reader, r#"{"id": "a"}"#).await),
            vec![json!({"id": "a"})]
        );
    }

    #[tokio::test]
    async fn malformed_json_names_the_source() {
        let reader = JsonReader::new(FileReaderArgs::default());

        let results = read_all(&reader, "{").await;

        assert_eq!(results.len(), 1);
        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodingError);
        assert!(err.message().starts_with("Could not decode content: input: "));
        assert!(err.is_entry_scoped());
    }

    #[tokio::test]
    async fn jsonl_reports_each_bad_line() {
        let reader = JsonLinesReader::new(FileReaderArgs::default());

        let results = read_all(&reader, "{\"a\": 1}\n\nnot json\n{\"a\": 2}\n").await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().as_value(), Some(&json!({"a": 1})));
        assert!(
            results[1]
                .as_ref()
                .unwrap_err()
                .message()
                .contains("input line 3")
        );
        assert_eq!(results[2].as_ref().unwrap().as_value(), Some(&json!({"a": 2})));
    }

    #[tokio::test]
    async fn yaml_empty_document_yields_nothing() {
        let reader = YamlReader::new(FileReaderArgs::default());

        assert!(read_all(&reader, "").await.is_empty());
        assert!(read_all(&reader, "  \n").await.is_empty());
        assert_eq!(
            values(read_all(&reader, "- id: eng\n- id: fra\n").await),
            vec![json!({"id": "eng"}), json!({"id": "fra"})]
        );
    }

    #[tokio::test]
    async fn csv_maps_records_by_header() {
        let reader = CsvReader::new(CsvReaderArgs {
            origin: None,
            delimiter: ';',
        })
        .unwrap();

        assert_eq!(
            values(read_all(&reader, "id;title\neng;English\nfra;French\n").await),
            vec![
                json!({"id": "eng", "title": "English"}),
                json!({"id": "fra", "title": "French"}),
            ]
        );
    }

    #[test]
    fn csv_rejects_multibyte_delimiter() {
        let err = CsvReader::new(CsvReaderArgs {
            origin: None,
            delimiter: '€',
        })
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidComponentArgs);
    }

    #[tokio::test]
    async fn xml_yields_requested_elements() {
        let reader = XmlReader::new(XmlReaderArgs {
            origin: None,
            root_element: Some("record".to_string()),
        });

        let results = read_all(
            &reader,
            "<records><record><id>1</id></record><record><id>2</id></record></records>",
        )
        .await;

        assert_eq!(values(results), vec![json!({"id": "1"}), json!({"id": "2"})]);
    }

    #[tokio::test]
    async fn xml_without_root_element_yields_document() {
        let reader = XmlReader::new(XmlReaderArgs::default());

        let results = read_all(&reader, "<record><id>1</id></record>").await;

        assert_eq!(values(results), vec![json!({"record": {"id": "1"}})]);
    }
}
