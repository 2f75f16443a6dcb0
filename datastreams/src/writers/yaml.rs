use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::{bail, etl_error};
use crate::types::StreamEntry;
use crate::writers::base::Writer;

#[derive(Debug, Clone, Deserialize)]
pub struct YamlWriterArgs {
    #[serde(alias = "target")]
    pub filepath: PathBuf,
}

/// Appends entries to a YAML file.
///
/// Every call appends one YAML list, so the file stays a single list no matter how many times it
/// is written to. Existing content is never truncated.
#[derive(Debug, Clone)]
pub struct YamlWriter {
    filepath: PathBuf,
}

impl YamlWriter {
    pub const NAME: &'static str = "YamlWriter";

    pub fn new(args: YamlWriterArgs) -> Self {
        Self {
            filepath: args.filepath,
        }
    }

    fn value(entry: &StreamEntry) -> EtlResult<&Value> {
        match entry.value() {
            Some(value) => Ok(value),
            None => bail!(
                ErrorKind::WriteFailed,
                "Raw bytes cannot be written as YAML",
                entry.entry
            ),
        }
    }

    async fn append(&self, values: &[&Value]) -> EtlResult<()> {
        let content = serde_yaml::to_string(values).map_err(|err| self.write_failed(err))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.filepath)
            .await
            .map_err(|err| self.write_failed(err))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|err| self.write_failed(err))?;
        file.flush().await.map_err(|err| self.write_failed(err))?;

        Ok(())
    }

    fn write_failed(&self, err: impl std::fmt::Display) -> EtlError {
        etl_error!(
            ErrorKind::WriteFailed,
            "Could not append to YAML file",
            format!("{}: {err}", self.filepath.display())
        )
    }
}

#[async_trait]
impl Writer for YamlWriter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn write(&self, entry: &StreamEntry) -> EtlResult<StreamEntry> {
        self.append(&[Self::value(entry)?]).await?;

        Ok(entry.clone())
    }

    /// Appends every entry holding a value as one list. Entries holding raw bytes get the error
    /// recorded and are left out.
    async fn write_many(&self, entries: Vec<StreamEntry>) -> EtlResult<Vec<StreamEntry>> {
        let mut values = Vec::with_capacity(entries.len());
        let mut rejected = Vec::new();
        for (position, entry) in entries.iter().enumerate() {
            match Self::value(entry) {
                Ok(value) => values.push(value),
                Err(err) => rejected.push((position, err)),
            }
        }
        if !values.is_empty() {
            self.append(&values).await?;
        }

        let mut written = entries;
        for (position, err) in rejected {
            written[position] = written[position].clone().with_stage_error(Self::NAME, &err);
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Blob;
    use serde_json::json;

    fn writer(dir: &tempfile::TempDir) -> YamlWriter {
        YamlWriter::new(YamlWriterArgs {
            filepath: dir.path().join("out.yaml"),
        })
    }

    #[tokio::test]
    async fn appends_lists() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(&dir);
        let entries = vec![
            StreamEntry::new(json!({"id": "eng"})),
            StreamEntry::new(json!({"id": "fra"})),
        ];

        writer.write_many(entries.clone()).await.unwrap();
        writer.write_many(entries).await.unwrap();
        writer
            .write(&StreamEntry::new(json!({"id": "deu"})))
            .await
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("out.yaml")).unwrap();
        let values: Vec<Value> = serde_yaml::from_str(&content).unwrap();
        assert_eq!(
            values,
            vec![
                json!({"id": "eng"}),
                json!({"id": "fra"}),
                json!({"id": "eng"}),
                json!({"id": "fra"}),
                json!({"id": "deu"}),
            ]
        );
    }

    #[tokio::test]
    async fn bytes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let err = writer(&dir)
            .write(&StreamEntry::new(Blob::named("a.bin", &b"\x00"[..])))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WriteFailed);
    }

    #[tokio::test]
    async fn bytes_in_a_group_only_fail_that_entry() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            StreamEntry::new(json!({"id": "eng"})),
            StreamEntry::new(Blob::named("a.bin", &b"\x00"[..])),
            StreamEntry::new(json!({"id": "fra"})),
        ];

        let written = writer(&dir).write_many(entries).await.unwrap();

        assert_eq!(written.len(), 3);
        assert!(written[0].errors.is_empty());
        assert_eq!(written[1].errors.len(), 1);
        assert!(written[1].errors[0].starts_with("YamlWriter: Raw bytes cannot be written as YAML"));
        assert!(written[2].errors.is_empty());

        let content = std::fs::read_to_string(dir.path().join("out.yaml")).unwrap();
        let values: Vec<Value> = serde_yaml::from_str(&content).unwrap();
        assert_eq!(values, vec![json!({"id": "eng"}), json!({"id": "fra"})]);
    }

    #[tokio::test]
    async fn unwritable_file_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = YamlWriter::new(YamlWriterArgs {
            filepath: dir.path().join("missing").join("out.yaml"),
        });

        let err = writer
            .write(&StreamEntry::new(json!({"id": "eng"})))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WriteFailed);
        assert!(err.is_entry_scoped());
        assert!(err.message().contains("out.yaml"));
    }
}
