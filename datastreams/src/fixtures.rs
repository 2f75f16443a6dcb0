use datastreams_config::shared::{VocabularyConfig, load_vocabularies_file};
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::datastream::RunReport;
use crate::error::EtlResult;
use crate::factories::{DEFAULT_SERVICE, DataStreamFactory};
use crate::service::Identity;
use crate::types::StreamEntry;

/// Outcome of loading one vocabulary of a fixtures file.
#[derive(Debug, Clone, Default)]
pub struct FixtureReport {
    pub vocabulary: String,
    pub report: RunReport,
    /// Entries that carried errors, in the order they were produced.
    pub errors: Vec<StreamEntry>,
}

/// Loads every vocabulary of a fixtures file, a YAML mapping of vocabulary id to datastream.
///
/// Vocabularies with a `pid-type` are registered as types of the `vocabularies` record service
/// before their entries are loaded. Relative `origin` paths of first readers are resolved against
/// the directory of the file.
#[derive(Debug, Clone)]
pub struct VocabularyFixture {
    filepath: PathBuf,
    factory: DataStreamFactory,
}

impl VocabularyFixture {
    pub fn new(filepath: impl Into<PathBuf>, factory: DataStreamFactory) -> Self {
        Self {
            filepath: filepath.into(),
            factory,
        }
    }

    /// Runs the datastream of every vocabulary, in vocabulary id order.
    pub async fn load(&self) -> EtlResult<Vec<FixtureReport>> {
        let vocabularies = load_vocabularies_file(&self.filepath)?;
        let base_dir = self.filepath.parent().unwrap_or(Path::new("."));

        let mut reports = Vec::with_capacity(vocabularies.len());
        for (vocabulary, config) in vocabularies {
            let report = self.load_vocabulary(&vocabulary, config, base_dir).await?;
            reports.push(report);
        }

        Ok(reports)
    }

    async fn load_vocabulary(
        &self,
        vocabulary: &str,
        mut config: VocabularyConfig,
        base_dir: &Path,
    ) -> EtlResult<FixtureReport> {
        if let Some(pid_type) = &config.pid_type {
            info!(vocabulary, pid_type = %pid_type, "creating vocabulary type");
            self.factory
                .context()
                .service(DEFAULT_SERVICE)?
                .create_type(&Identity::system(), vocabulary, pid_type)
                .await?;
        }
        resolve_origin(&mut config, base_dir);

        let datastream = self.factory.create(&config.datastream)?;
        let mut fixture = FixtureReport {
            vocabulary: vocabulary.to_string(),
            ..Default::default()
        };

        let mut results = datastream.process();
        while let Some(result) = results.next().await {
            let entry = result?;
            fixture.report.record(&entry);
            if entry.has_errors() {
                error!(vocabulary, entry = %entry.entry, errors = ?entry.errors, "fixture entry failed");
                fixture.errors.push(entry);
            }
        }

        info!(
            vocabulary,
            total = fixture.report.total,
            errored = fixture.report.errored,
            "vocabulary loaded"
        );

        Ok(fixture)
    }
}

fn resolve_origin(config: &mut VocabularyConfig, base_dir: &Path) {
    let Some(reader) = config.datastream.readers.first() else {
        return;
    };
    let Some(Value::String(origin)) = reader.arg("origin") else {
        return;
    };
    if origin.contains("://") || Path::new(origin).is_absolute() {
        return;
    }

    let resolved = base_dir.join(origin).to_string_lossy().into_owned();
    config.datastream.set_origin(resolved);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factories::FactoryContext;
    use crate::service::{MemoryRecordService, RecordService};
    use std::sync::Arc;

    #[tokio::test]
    async fn loads_every_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("languages.yaml"),
            "- id: eng\n  type: languages\n- id: fra\n  type: languages\n- title: no id\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("licenses.json"),
            r#"[{"id": "cc-by-4.0", "type": "licenses"}]"#,
        )
        .unwrap();
        let fixtures = dir.path().join("vocabularies.yaml");
        std::fs::write(
            &fixtures,
            r#"
languages:
  pid-type: lng
  readers:
    - type: yaml
      args:
        origin: languages.yaml
  writers:
    - type: service
licenses:
  pid-type: lic
  readers:
    - type: json
      args:
        origin: licenses.json
  writers:
    - type: service
"#,
        )
        .unwrap();

        let service = MemoryRecordService::default();
        let context = FactoryContext::default()
            .with_service("vocabularies", Arc::new(service.clone()) as Arc<dyn RecordService>);
        let fixture = VocabularyFixture::new(&fixtures, DataStreamFactory::new(context));

        let reports = fixture.load().await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].vocabulary, "languages");
        assert_eq!(reports[0].report.total, 3);
        assert_eq!(reports[0].errors.len(), 1);
        assert_eq!(reports[1].vocabulary, "licenses");
        assert_eq!(reports[1].report.succeeded, 1);
        assert_eq!(service.len().await, 3);
        assert_eq!(service.pid_type("languages").await.as_deref(), Some("lng"));
        assert_eq!(service.pid_type("licenses").await.as_deref(), Some("lic"));
    }
}
