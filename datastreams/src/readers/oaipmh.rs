use async_stream::stream;
use quick_xml::Reader as XmlReader;
use quick_xml::events::Event;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::readers::base::{Reader, ReaderCapabilities, ReaderStream, unsupported_mode};
use crate::types::Payload;
use crate::xml::XmlError;
use crate::{bail, etl_error};

const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// Harvesting strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum OaiVerb {
    /// One request per page of records.
    #[default]
    ListRecords,
    /// One request per page of identifiers, then one `GetRecord` request per identifier.
    ListIdentifiers,
}

fn default_metadata_prefix() -> String {
    "oai_dc".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OaiPmhReaderArgs {
    #[serde(alias = "origin")]
    pub base_url: String,
    #[serde(default = "default_metadata_prefix")]
    pub metadata_prefix: String,
    #[serde(default)]
    pub set: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub verb: OaiVerb,
}

/// One harvested record (or header, for `ListIdentifiers`).
#[derive(Debug, Default, Clone, PartialEq)]
struct OaiRecord {
    identifier: String,
    deleted: bool,
    /// Raw XML of the element inside `<metadata>`.
    metadata: Option<String>,
}

/// Parsed content of one OAI-PMH response.
#[derive(Debug, Default, PartialEq)]
struct OaiPage {
    error: Option<(String, String)>,
    records: Vec<OaiRecord>,
    resumption_token: Option<String>,
}

fn parse_page(text: &str) -> Result<OaiPage, XmlError> {
    let mut reader = XmlReader::from_str(text);
    let mut page = OaiPage::default();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<OaiRecord> = None;
    let mut metadata_start: Option<usize> = None;

    loop {
        let position = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                let in_metadata = path.last().is_some_and(|parent| parent == "metadata");
                if in_metadata && metadata_start.is_none() {
                    metadata_start = Some(position);
                }

                match name.as_str() {
                    "error" => {
                        let code = start
                            .try_get_attribute("code")?
                            .map(|code| code.unescape_value().map(|code| code.into_owned()))
                            .transpose()?
                            .unwrap_or_default();
                        page.error = Some((code, String::new()));
                    }
                    "header" => {
                        let deleted = start
                            .try_get_attribute("status")?
                            .is_some_and(|status| status.value.as_ref() == b"deleted");
                        current.get_or_insert_with(OaiRecord::default).deleted = deleted;
                    }
                    _ => {}
                }

                path.push(name);
            }
            Event::Empty(start) => {
                let in_metadata = path.last().is_some_and(|parent| parent == "metadata");
                if in_metadata
                    && let Some(record) = current.as_mut()
                    && record.metadata.is_none()
                {
                    let end = reader.buffer_position() as usize;
                    record.metadata = Some(text[position..end].to_string());
                }

                if start.local_name().as_ref() == b"error" {
                    page.error = Some((String::new(), String::new()));
                }
            }
            Event::End(_) => {
                let Some(name) = path.pop() else {
                    continue;
                };

                let parent = path.last().map(String::as_str);
                if parent == Some("metadata")
                    && let Some(start) = metadata_start.take()
                    && let Some(record) = current.as_mut()
                {
                    let end = reader.buffer_position() as usize;
                    record.metadata = Some(text[start..end].to_string());
                }

                match (name.as_str(), parent) {
                    ("record", _) => page.records.extend(current.take()),
                    ("header", Some(parent)) if parent != "record" => {
                        page.records.extend(current.take())
                    }
                    _ => {}
                }
            }
            Event::Text(content) => {
                let content = content.unescape()?;
                let content = content.trim();
                if content.is_empty() {
                    continue;
                }

                let parent = path.len().checked_sub(2).map(|index| path[index].as_str());
                match (path.last().map(String::as_str), parent) {
                    (Some("identifier"), Some("header")) => {
                        current.get_or_insert_with(OaiRecord::default).identifier =
                            content.to_string();
                    }
                    (Some("resumptionToken"), _) => {
                        page.resumption_token = Some(content.to_string());
                    }
                    (Some("error"), _) => {
                        if let Some((_, message)) = page.error.as_mut() {
                            message.push_str(content);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(page)
}

/// Harvests records from an OAI-PMH endpoint.
///
/// Yields `{"record": <xml>}` for every non-deleted record, where `<xml>` is the raw metadata
/// element of the record.
#[derive(Debug, Clone)]
pub struct OaiPmhReader {
    client: Client,
    args: OaiPmhReaderArgs,
}

impl OaiPmhReader {
    pub const NAME: &'static str = "OaiPmhReader";

    pub fn new(args: OaiPmhReaderArgs) -> Self {
        Self {
            client: Client::new(),
            args,
        }
    }

    fn initial_query(&self, verb: &'static str) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("verb", verb.to_string()),
            ("metadataPrefix", self.args.metadata_prefix.clone()),
        ];
        for (key, value) in [
            ("set", &self.args.set),
            ("from", &self.args.from),
            ("until", &self.args.until),
        ] {
            if let Some(value) = value {
                query.push((key, value.clone()));
            }
        }

        query
    }

    async fn fetch(&self, query: &[(&'static str, String)]) -> EtlResult<OaiPage> {
        debug!(base_url = %self.args.base_url, ?query, "sending OAI-PMH request");

        let response = self
            .client
            .get(&self.args.base_url)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            bail!(
                ErrorKind::HttpStatusError,
                "Unexpected HTTP status",
                format!("{} returned {status}", self.args.base_url)
            );
        }

        let body = response.text().await?;
        let page = parse_page(&body).map_err(|err| {
            etl_error!(
                ErrorKind::DecodingError,
                "Could not parse OAI-PMH response",
                err
            )
        })?;

        if let Some((code, message)) = &page.error {
            if code == NO_RECORDS_MATCH {
                bail!(
                    ErrorKind::NoRecordsMatch,
                    "No records match the harvesting request",
                    message
                );
            }

            bail!(
                ErrorKind::ReadFailed,
                "OAI-PMH request failed",
                format!("{code}: {message}")
            );
        }

        Ok(page)
    }

    async fn get_record(&self, identifier: &str) -> EtlResult<Option<OaiRecord>> {
        let query = [
            ("verb", "GetRecord".to_string()),
            ("identifier", identifier.to_string()),
            ("metadataPrefix", self.args.metadata_prefix.clone()),
        ];

        Ok(self.fetch(&query).await?.records.into_iter().next())
    }
}

fn into_payload(record: OaiRecord) -> Option<Payload> {
    if record.deleted {
        debug!(identifier = %record.identifier, "skipping deleted record");
        return None;
    }

    record
        .metadata
        .map(|metadata| Payload::Value(json!({ "record": metadata })))
}

fn is_fatal(result: &Result<Vec<Payload>, EtlError>) -> bool {
    result.as_ref().is_err_and(|err| !err.is_entry_scoped())
}

impl Reader for OaiPmhReader {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn capabilities(&self) -> ReaderCapabilities {
        ReaderCapabilities::ROOT_ONLY
    }

    fn read(&self, item: Option<Payload>) -> ReaderStream {
        if item.is_some() {
            return unsupported_mode(Self::NAME, true);
        }

        let this = self.clone();

        Box::pin(stream! {
            let verb = match this.args.verb {
                OaiVerb::ListRecords => "ListRecords",
                OaiVerb::ListIdentifiers => "ListIdentifiers",
            };
            let mut query = this.initial_query(verb);
            let mut pages = 0usize;

            loop {
                let page = match this.fetch(&query).await {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                pages += 1;

                for record in page.records {
                    match this.args.verb {
                        OaiVerb::ListRecords => {
                            if let Some(payload) = into_payload(record) {
                                yield Ok(payload);
                            }
                        }
                        OaiVerb::ListIdentifiers => {
                            if record.deleted {
                                continue;
                            }

                            let fetched = this
                                .get_record(&record.identifier)
                                .await
                                .map(|record| record.and_then(into_payload).into_iter().collect());
                            let fatal = is_fatal(&fetched);
                            match fetched {
                                Ok(payloads) => {
                                    for payload in payloads {
                                        yield Ok(payload);
                                    }
                                }
                                Err(err) => yield Err(err),
                            }
                            if fatal {
                                return;
                            }
                        }
                    }
                }

                match page.resumption_token {
                    Some(token) => {
                        query = vec![("verb", verb.to_string()), ("resumptionToken", token)];
                    }
                    None => break,
                }
            }

            info!(base_url = %this.args.base_url, pages, "finished OAI-PMH harvest");
        })
    }
}
