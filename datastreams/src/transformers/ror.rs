use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::transformers::base::Transformer;
use crate::types::StreamEntry;

static ROR_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:ror\.org/)?(0[a-hj-km-np-tv-z0-9]{6}[0-9]{2})$")
        .expect("valid ROR id regex")
});

const FUNDREF: &str = "fundref";

/// Returns the bare ROR id (`05dxps055`) of a ROR identifier or URL.
pub fn normalize_ror(id: &str) -> Option<String> {
    ROR_ID
        .captures(id.trim())
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

fn default_vocab_schemes() -> Vec<String> {
    vec!["grid".to_string(), "isni".to_string(), "doi".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct RorTransformerArgs {
    /// External identifier types kept in `identifiers`.
    #[serde(default = "default_vocab_schemes")]
    pub vocab_schemes: Vec<String>,
    /// When set, `fundref` ids are kept as DOIs under this prefix.
    #[serde(default)]
    pub funder_fundref_doi_prefix: Option<String>,
}

impl Default for RorTransformerArgs {
    fn default() -> Self {
        Self {
            vocab_schemes: default_vocab_schemes(),
            funder_fundref_doi_prefix: None,
        }
    }
}

/// Transforms a ROR organization record into a vocabulary record (affiliation or funder).
#[derive(Debug, Clone)]
pub struct RorTransformer {
    vocab_schemes: Vec<String>,
    fundref_doi_prefix: Option<String>,
}

/// Names of a ROR record folded into their vocabulary fields.
#[derive(Debug, Default)]
struct Names {
    name: Option<String>,
    title: Map<String, Value>,
    acronym: Option<String>,
    aliases: Vec<String>,
}

impl Names {
    fn add_alias(&mut self, alias: &str) {
        if !self.aliases.iter().any(|known| known == alias) {
            self.aliases.push(alias.to_string());
        }
    }

    fn fold(names: &[Value]) -> Self {
        let mut folded = Names::default();
        for name in names {
            let Some(value) = name.get("value").and_then(Value::as_str) else {
                continue;
            };
            let types: Vec<&str> = name
                .get("types")
                .and_then(Value::as_array)
                .map(|types| types.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();

            if types.contains(&"ror_display") && folded.name.is_none() {
                folded.name = Some(value.to_string());
            }
            if types.contains(&"label") {
                let lang = name.get("lang").and_then(Value::as_str).unwrap_or("en");
                folded
                    .title
                    .entry(lang.to_string())
                    .or_insert_with(|| Value::String(value.to_string()));
            }
            if types.contains(&"alias") {
                folded.add_alias(value);
            }
            if types.contains(&"acronym") {
                match folded.acronym {
                    None => folded.acronym = Some(value.to_string()),
                    Some(_) => folded.add_alias(value),
                }
            }
        }

        folded
    }
}

/// Picks the preferred value of an external id, falling back to the first of `all`.
fn external_id_value(external_id: &Value) -> Option<String> {
    let preferred = external_id
        .get("preferred")
        .and_then(Value::as_str)
        .filter(|preferred| !preferred.is_empty());
    let first = match external_id.get("all") {
        Some(Value::Array(all)) => all.first().and_then(Value::as_str),
        Some(Value::String(all)) => Some(all.as_str()),
        _ => None,
    };

    preferred.or(first).map(str::to_string)
}

impl RorTransformer {
    pub const NAME: &'static str = "RorTransformer";

    pub fn new(args: RorTransformerArgs) -> Self {
        Self {
            vocab_schemes: args
                .vocab_schemes
                .into_iter()
                .map(|scheme| scheme.to_lowercase())
                .collect(),
            fundref_doi_prefix: args.funder_fundref_doi_prefix,
        }
    }

    /// Lists `(type, external id)` pairs for both the list layout and the older mapping layout.
    fn external_ids(record: &Value) -> Vec<(String, &Value)> {
        match record.get("external_ids") {
            Some(Value::Array(ids)) => ids
                .iter()
                .filter_map(|id| {
                    let scheme = id.get("type").and_then(Value::as_str)?;
                    Some((scheme.to_lowercase(), id))
                })
                .collect(),
            Some(Value::Object(ids)) => ids
                .iter()
                .map(|(scheme, id)| (scheme.to_lowercase(), id))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn identifiers(&self, id: &str, record: &Value) -> Vec<Value> {
        let mut identifiers = vec![json!({"scheme": "ror", "identifier": id})];

        for (scheme, external_id) in Self::external_ids(record) {
            let Some(value) = external_id_value(external_id) else {
                continue;
            };

            if scheme == FUNDREF {
                if let Some(prefix) = &self.fundref_doi_prefix {
                    identifiers.push(json!({"scheme": "doi", "identifier": format!("{prefix}/{value}")}));
                }
            } else if self.vocab_schemes.contains(&scheme) {
                identifiers.push(json!({"scheme": scheme, "identifier": value}));
            }
        }

        identifiers
    }
}

impl Transformer for RorTransformer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn apply(&self, entry: &StreamEntry) -> EtlResult<StreamEntry> {
        let Some(record) = entry.value().filter(|record| record.is_object()) else {
            bail!(ErrorKind::TransformationFailed, "ROR entry is not a mapping.");
        };

        let Some(id) = record
            .get("id")
            .and_then(Value::as_str)
            .and_then(normalize_ror)
        else {
            bail!(ErrorKind::InvalidIdentifier, "Id not found in ROR entry.");
        };

        let names = record
            .get("names")
            .and_then(Value::as_array)
            .map(|names| Names::fold(names.as_slice()))
            .unwrap_or_default();
        let Some(name) = names.name.clone() else {
            bail!(ErrorKind::MissingField, "Name not found in ROR entry.");
        };

        let mut title = names.title;
        if !title.contains_key("en") {
            title.insert("en".to_string(), Value::String(name.clone()));
        }

        let mut output = Map::new();
        output.insert("id".to_string(), Value::String(id.clone()));
        output.insert("name".to_string(), Value::String(name));
        output.insert("title".to_string(), Value::Object(title));
        if let Some(acronym) = names.acronym {
            output.insert("acronym".to_string(), Value::String(acronym));
        }
        if !names.aliases.is_empty() {
            output.insert("aliases".to_string(), json!(names.aliases));
        }

        // Subsequent locations are ignored.
        if let Some(details) = record.pointer("/locations/0/geonames_details") {
            for (source, target) in [
                ("country_code", "country"),
                ("country_name", "country_name"),
                ("name", "location_name"),
            ] {
                if let Some(value) = details.get(source).filter(|value| !value.is_null()) {
                    output.insert(target.to_string(), value.clone());
                }
            }
        }

        if let Some(status) = record.get("status") {
            output.insert("status".to_string(), status.clone());
        }
        output.insert(
            "identifiers".to_string(),
            Value::Array(self.identifiers(&id, record)),
        );
        if let Some(types) = record.get("types") {
            output.insert("types".to_string(), types.clone());
        }

        Ok(entry.clone().with_payload(Value::Object(output)))
    }
}
