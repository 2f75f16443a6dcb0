use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::load::Config;
use crate::shared::{ConfigLoadError, DataStreamConfig, ValidationError};

/// A vocabulary entry as found in fixture files and in the importer configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VocabularyConfig {
    /// Persistent identifier type of the vocabulary, when it has to be created first.
    #[serde(rename = "pid-type", default, skip_serializing_if = "Option::is_none")]
    pub pid_type: Option<String>,
    #[serde(flatten)]
    pub datastream: DataStreamConfig,
}

/// Mapping of vocabulary id to its datastream, ordered by id.
pub type VocabulariesConfig = BTreeMap<String, VocabularyConfig>;

/// Parses and validates a fixtures file (a mapping of vocabulary id to datastream config).
pub fn load_vocabularies_file(
    path: impl AsRef<Path>,
) -> Result<VocabulariesConfig, ConfigLoadError> {
    let content = std::fs::read_to_string(path)?;
    let vocabularies: Option<VocabulariesConfig> = serde_yaml::from_str(&content)?;
    let vocabularies = vocabularies.unwrap_or_default();

    for vocabulary in vocabularies.values() {
        vocabulary.datastream.validate()?;
    }

    Ok(vocabularies)
}

/// Configuration of the `vocabularies` importer binary.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ImporterConfig {
    /// Datastreams known by vocabulary name, used when no `--filepath` is given.
    #[serde(default)]
    pub vocabularies: VocabulariesConfig,
}

impl ImporterConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, vocabulary) in &self.vocabularies {
            vocabulary.datastream.validate().map_err(|err| {
                ValidationError::InvalidConfig(format!("vocabulary `{name}`: {err}"))
            })?;
        }

        Ok(())
    }
}

impl Config for ImporterConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
