use async_stream::stream;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, EtlResult};
use crate::readers::base::{Reader, ReaderCapabilities, ReaderStream, unsupported_mode};
use crate::types::{Blob, Payload};
use crate::{bail, etl_error};

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(id) => id.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpReaderArgs {
    /// URL to fetch; `{id}` is replaced by each configured id.
    pub origin: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub ids: Vec<Value>,
    /// Sent as the `Accept` header.
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Fetches one URL per configured id and yields the raw response bodies.
#[derive(Debug, Clone)]
pub struct SimpleHttpReader {
    client: Client,
    origin: String,
    ids: Vec<String>,
    content_type: Option<String>,
}

impl SimpleHttpReader {
    pub const NAME: &'static str = "SimpleHttpReader";

    pub fn new(args: HttpReaderArgs) -> EtlResult<Self> {
        let ids: Vec<String> = if args.ids.is_empty() {
            args.id.iter().map(id_to_string).collect()
        } else {
            args.ids.iter().map(id_to_string).collect()
        };

        if ids.is_empty() {
            bail!(
                ErrorKind::InvalidComponentArgs,
                "Either `id` or `ids` must be configured",
                Self::NAME
            );
        }

        Ok(Self {
            client: Client::new(),
            origin: args.origin,
            ids,
            content_type: args.content_type,
        })
    }
}

impl Reader for SimpleHttpReader {
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
            for id in &this.ids {
                let url = this.origin.replace("{id}", id);
                debug!(%url, "fetching vocabulary source");

                let mut request = this.client.get(&url);
                if let Some(content_type) = &this.content_type {
                    request = request.header(ACCEPT, content_type);
                }

                let response = match request.send().await {
                    Ok(response) => response,
                    Err(err) => {
                        yield Err(err.into());
                        return;
                    }
                };

                let status = response.status();
                if status != StatusCode::OK {
                    warn!(%url, %status, "vocabulary source returned an unexpected status");
                    yield Err(etl_error!(
                        ErrorKind::HttpStatusError,
                        "Unexpected HTTP status",
                        format!("{url} returned {status}")
                    ));
                    continue;
                }

                match response.bytes().await {
                    Ok(body) => yield Ok(Payload::Bytes(Blob::named(url, body))),
                    Err(err) => {
                        yield Err(err.into());
                        return;
                    }
                }
            }
        })
    }
}

/// Concept record of the ROR data dump; always resolves to its latest version.
pub const ROR_DUMP_RECORD_URL: &str = "https://zenodo.org/api/records/6347574";

const LINKSET_CONTENT_TYPE: &str = "application/linkset+json";

const ZIP_CONTENT_TYPE: &str = "application/zip";

fn default_ror_origin() -> String {
    ROR_DUMP_RECORD_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RorHttpReaderArgs {
    #[serde(default = "default_ror_origin")]
    pub origin: String,
}

impl Default for RorHttpReaderArgs {
    fn default() -> Self {
        Self {
            origin: default_ror_origin(),
        }
    }
}

/// Downloads the latest ROR data dump archive.
///
/// The record's signposting linkset must list exactly one ZIP item, whose bytes are yielded.
#[derive(Debug, Clone)]
pub struct RorHttpReader {
    client: Client,
    origin: String,
}

impl RorHttpReader {
    pub const NAME: &'static str = "RorHttpReader";

    pub fn new(args: RorHttpReaderArgs) -> Self {
        Self {
            client: Client::new(),
            origin: args.origin,
        }
    }

    async fn resolve_dump_url(&self) -> EtlResult<String> {
        let linkset: Value = self
            .client
            .get(&self.origin)
            .header(ACCEPT, LINKSET_CONTENT_TYPE)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(items) = linkset
            .pointer("/linkset/0/item")
            .and_then(Value::as_array)
        else {
            bail!(
                ErrorKind::UnexpectedRemoteContent,
                "Linkset has no landing page items",
                self.origin
            );
        };

        let zip_items: Vec<&str> = items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some(ZIP_CONTENT_TYPE))
            .filter_map(|item| item.get("href").and_then(Value::as_str))
            .collect();

        match zip_items.as_slice() {
            [href] => Ok(href.to_string()),
            _ => bail!(
                ErrorKind::UnexpectedRemoteContent,
                "Expected 1 ZIP item",
                format!("got {}", zip_items.len())
            ),
        }
    }

    async fn download(&self) -> EtlResult<Blob> {
        let url = self.resolve_dump_url().await?;
        info!(%url, "downloading ROR data dump");

        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(Blob::named(url, body))
    }
}

impl Reader for RorHttpReader {
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
            yield this.download().await.map(Payload::Bytes);
        })
    }
}
