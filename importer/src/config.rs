use datastreams_config::load_config;
use datastreams_config::shared::{DataStreamConfig, ImporterConfig, load_vocabularies_file};
use std::path::Path;

/// Directory the importer reads its configuration from, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Loads the [`ImporterConfig`] and validates it.
///
/// Without a `configuration` directory no vocabulary is preconfigured and every run needs a
/// `--filepath`.
pub fn load_importer_config() -> anyhow::Result<ImporterConfig> {
    if !Path::new(CONFIGURATION_DIR).is_dir() {
        return Ok(ImporterConfig::default());
    }

    let config = load_config::<ImporterConfig>()?;
    config.validate()?;

    Ok(config)
}

/// Resolves the datastream of `vocabulary`, from `filepath` when given and from the importer
/// configuration otherwise.
pub fn datastream_config(
    config: &ImporterConfig,
    vocabulary: &str,
    filepath: Option<&Path>,
    origin: Option<&str>,
) -> anyhow::Result<DataStreamConfig> {
    let vocabularies = match filepath {
        Some(filepath) => load_vocabularies_file(filepath)?,
        None => config.vocabularies.clone(),
    };

    let Some(vocabulary_config) = vocabularies.get(vocabulary) else {
        anyhow::bail!("Vocabulary {vocabulary} not configured.");
    };

    let mut datastream = vocabulary_config.datastream.clone();
    if let Some(origin) = origin {
        datastream.set_origin(origin);
    }

    Ok(datastream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastreams_config::shared::VocabularyConfig;
    use serde_json::json;

    fn importer_config() -> ImporterConfig {
        let datastream = DataStreamConfig::from_yaml_str(
            "readers:\n  - type: yaml\n    args:\n      origin: names.yaml\nwriters:\n  - type: names-service\n",
        )
        .unwrap();
        let mut config = ImporterConfig::default();
        config.vocabularies.insert(
            "names".to_string(),
            VocabularyConfig {
                pid_type: None,
                datastream,
            },
        );

        config
    }

    #[test]
    fn origin_overrides_the_first_reader() {
        let datastream =
            datastream_config(&importer_config(), "names", None, Some("/tmp/other.yaml")).unwrap();

        assert_eq!(
            datastream.readers[0].arg("origin"),
            Some(&json!("/tmp/other.yaml"))
        );
    }

    #[test]
    fn fixtures_file_takes_precedence_over_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let filepath = dir.path().join("vocabularies.yaml");
        std::fs::write(
            &filepath,
            "names:\n  readers:\n    - type: csv\n  writers:\n    - type: names-service\n",
        )
        .unwrap();

        let datastream =
            datastream_config(&importer_config(), "names", Some(&filepath), None).unwrap();

        assert_eq!(datastream.readers[0].type_, "csv");
    }

    #[test]
    fn unknown_vocabulary_is_rejected() {
        let err = datastream_config(&importer_config(), "awards", None, None).unwrap_err();

        assert_eq!(err.to_string(), "Vocabulary awards not configured.");
    }
}
