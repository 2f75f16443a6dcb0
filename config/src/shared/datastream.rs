use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::shared::{BatchConfig, ConfigLoadError, ValidationError};

fn empty_args() -> Value {
    Value::Object(Map::new())
}

/// Declarative spec of a single datastream component.
///
/// `type` is resolved against the component registry of the matching kind and `args` are handed
/// to the registered constructor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

impl ComponentConfig {
    /// Creates a component spec without arguments.
    pub fn new(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            args: empty_args(),
        }
    }

    /// Creates a component spec with the given arguments.
    pub fn with_args(type_: impl Into<String>, args: Value) -> Self {
        Self {
            type_: type_.into(),
            args,
        }
    }

    /// Returns the argument stored under `key`, if any.
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// Sets the argument `key`, turning a missing `args` into a mapping first.
    pub fn set_arg(&mut self, key: impl Into<String>, value: Value) {
        if !self.args.is_object() {
            self.args = empty_args();
        }

        if let Value::Object(args) = &mut self.args {
            args.insert(key.into(), value);
        }
    }

    fn validate(&self, kind: &'static str, position: usize) -> Result<(), ValidationError> {
        if self.type_.trim().is_empty() {
            return Err(ValidationError::EmptyComponentType(kind, position));
        }

        if !(self.args.is_object() || self.args.is_null()) {
            return Err(ValidationError::InvalidComponentArgs(
                kind,
                self.type_.clone(),
            ));
        }

        Ok(())
    }
}

/// Configuration of one datastream: what to read, how to transform it and where to write it.
///
/// `readers` and `writers` are required, `transformers` may be missing or empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DataStreamConfig {
    pub readers: Vec<ComponentConfig>,
    #[serde(default)]
    pub transformers: Vec<ComponentConfig>,
    pub writers: Vec<ComponentConfig>,
    #[serde(flatten)]
    pub batch: BatchConfig,
}

impl DataStreamConfig {
    /// Parses and validates a datastream configuration from a YAML (or JSON) string.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigLoadError> {
        let config: DataStreamConfig = serde_yaml::from_str(content)?;
        config.validate()?;

        Ok(config)
    }

    /// Parses and validates a datastream configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let content = std::fs::read_to_string(path)?;

        Self::from_yaml_str(&content)
    }

    /// Validates the structural invariants of the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.readers.is_empty() {
            return Err(ValidationError::NoReaders);
        }

        if self.writers.is_empty() {
            return Err(ValidationError::NoWriters);
        }

        if self.batch.batch_size == 0 {
            return Err(ValidationError::BatchSizeZero);
        }

        for (position, reader) in self.readers.iter().enumerate() {
            reader.validate("Reader", position)?;
        }
        for (position, transformer) in self.transformers.iter().enumerate() {
            transformer.validate("Transformer", position)?;
        }
        for (position, writer) in self.writers.iter().enumerate() {
            writer.validate("Writer", position)?;
        }

        Ok(())
    }

    /// Overrides the `origin` argument of the first reader.
    pub fn set_origin(&mut self, origin: impl Into<String>) {
        if let Some(reader) = self.readers.first_mut() {
            reader.set_arg("origin", Value::String(origin.into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FULL_CONFIG: &str = r#"
readers:
  - type: zip
    args:
      regex: "\\.json$"
  - type: json
transformers:
  - type: ror
writers:
  - type: affiliations-service
    args:
      update: true
batch_size: 50
write_many: true
"#;

    #[test]
    fn parses_full_config() {
        let config = DataStreamConfig::from_yaml_str(FULL_CONFIG).unwrap();

        assert_eq!(config.readers.len(), 2);
        assert_eq!(config.readers[0].type_, "zip");
        assert_eq!(config.readers[0].arg("regex"), Some(&json!("\\.json$")));
        assert_eq!(config.readers[1].args, json!({}));
        assert_eq!(config.transformers[0].type_, "ror");
        assert_eq!(config.writers[0].arg("update"), Some(&json!(true)));
        assert_eq!(config.batch.batch_size, 50);
        assert!(config.batch.write_many);
    }

    #[test]
    fn missing_readers_fails() {
        let result = DataStreamConfig::from_yaml_str("writers:\n  - type: yaml\n");
        assert!(matches!(result, Err(ConfigLoadError::Yaml(_))));
    }

    #[test]
    fn missing_writers_fails() {
        let result = DataStreamConfig::from_yaml_str("readers:\n  - type: yaml\n");
        assert!(matches!(result, Err(ConfigLoadError::Yaml(_))));
    }

    #[test]
    fn empty_readers_fails_validation() {
        let result = DataStreamConfig::from_yaml_str("readers: []\nwriters:\n  - type: yaml\n");
        assert!(matches!(
            result,
            Err(ConfigLoadError::Validation(ValidationError::NoReaders))
        ));
    }

    #[test]
    fn empty_writers_fails_validation() {
        let result = DataStreamConfig::from_yaml_str("readers:\n  - type: yaml\nwriters: []\n");
        assert!(matches!(
            result,
            Err(ConfigLoadError::Validation(ValidationError::NoWriters))
        ));
    }

    #[test]
    fn empty_transformers_are_accepted() {
        let config = DataStreamConfig::from_yaml_str(
            "readers:\n  - type: yaml\ntransformers: []\nwriters:\n  - type: yaml\n",
        )
        .unwrap();

        assert!(config.transformers.is_empty());
        assert_eq!(config.batch, BatchConfig::default());
    }

    #[test]
    fn zero_batch_size_fails_validation() {
        let result = DataStreamConfig::from_yaml_str(
            "readers:\n  - type: yaml\nwriters:\n  - type: yaml\nbatch_size: 0\n",
        );
        assert!(matches!(
            result,
            Err(ConfigLoadError::Validation(ValidationError::BatchSizeZero))
        ));
    }

    #[test]
    fn non_mapping_args_fail_validation() {
        let result = DataStreamConfig::from_yaml_str(
            "readers:\n  - type: yaml\n    args: [1, 2]\nwriters:\n  - type: yaml\n",
        );
        assert!(matches!(
            result,
            Err(ConfigLoadError::Validation(
                ValidationError::InvalidComponentArgs("Reader", _)
            ))
        ));
    }

    #[test]
    fn set_origin_overrides_first_reader() {
        let mut config = DataStreamConfig::from_yaml_str(FULL_CONFIG).unwrap();
        config.set_origin("/tmp/ror.zip");

        assert_eq!(config.readers[0].arg("origin"), Some(&json!("/tmp/ror.zip")));
        assert_eq!(config.readers[0].arg("regex"), Some(&json!("\\.json$")));
        assert_eq!(config.readers[1].arg("origin"), None);
    }
}
