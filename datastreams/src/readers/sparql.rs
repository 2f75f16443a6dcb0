use async_stream::stream;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ErrorKind, EtlResult};
use crate::readers::base::{Reader, ReaderCapabilities, ReaderStream, unsupported_mode};
use crate::types::Payload;
use crate::{bail, etl_error};

const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

#[derive(Debug, Clone, Deserialize)]
pub struct SparqlReaderArgs {
    /// Endpoint URL.
    pub origin: String,
    pub query: String,
}

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<Map<String, Value>>,
}

/// Flattens `{var: {"type": .., "value": ..}}` into `{var: value}`.
fn flatten_binding(binding: Map<String, Value>) -> Value {
    let flattened = binding
        .into_iter()
        .map(|(var, term)| {
            let value = match term {
                Value::Object(mut term) => term.remove("value").unwrap_or(Value::Null),
                other => other,
            };
            (var, value)
        })
        .collect();

    Value::Object(flattened)
}

/// Runs one query against a SPARQL endpoint and yields each result binding.
#[derive(Debug, Clone)]
pub struct SparqlReader {
    client: Client,
    origin: String,
    query: String,
}

impl SparqlReader {
    pub const NAME: &'static str = "SparqlReader";

    pub fn new(args: SparqlReaderArgs) -> Self {
        Self {
            client: Client::new(),
            origin: args.origin,
            query: args.query,
        }
    }

    async fn bindings(&self) -> EtlResult<Vec<Value>> {
        let response = self
            .client
            .post(&self.origin)
            .header(ACCEPT, SPARQL_RESULTS_JSON)
            .form(&[("query", self.query.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            bail!(
                ErrorKind::HttpStatusError,
                "Unexpected HTTP status",
                format!("{} returned {status}", self.origin)
            );
        }

        let body = response.bytes().await?;
        let parsed: SparqlResponse = serde_json::from_slice(&body).map_err(|err| {
            etl_error!(
                ErrorKind::DecodingError,
                "Could not decode SPARQL results",
                format!("{}: {err}", self.origin)
            )
        })?;

        Ok(parsed
            .results
            .bindings
            .into_iter()
            .map(flatten_binding)
            .collect())
    }
}

impl Reader for SparqlReader {
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
            match this.bindings().await {
                Ok(bindings) => {
                    for binding in bindings {
                        yield Ok(Payload::Value(binding));
                    }
                }
                Err(err) => yield Err(err),
            }
        })
    }
}
