use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::service::{IdStrategy, Identity, RecordId, RecordService, ServiceError};
use crate::types::{OpType, StreamEntry};
use crate::writers::base::Writer;
use crate::{bail, etl_error};

fn default_insert() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceWriterArgs {
    /// Name of the record service to write to, defaults to the one of the registered writer.
    #[serde(default, alias = "service_or_name")]
    pub service: Option<String>,
    #[serde(default = "default_insert")]
    pub insert: bool,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub id_strategy: Option<IdStrategy>,
}

impl Default for ServiceWriterArgs {
    fn default() -> Self {
        Self {
            service: None,
            insert: default_insert(),
            update: false,
            id_strategy: None,
        }
    }
}

/// Writes entries to a [`RecordService`], creating or updating records.
pub struct ServiceWriter {
    service: Arc<dyn RecordService>,
    identity: Identity,
    insert: bool,
    update: bool,
    strategy: IdStrategy,
}

impl ServiceWriter {
    pub const NAME: &'static str = "ServiceWriter";

    pub fn new(
        service: Arc<dyn RecordService>,
        insert: bool,
        update: bool,
        strategy: IdStrategy,
    ) -> Self {
        Self {
            service,
            identity: Identity::system(),
            insert,
            update,
            strategy,
        }
    }

    fn data(entry: &StreamEntry) -> EtlResult<&Value> {
        match entry.value() {
            Some(data @ Value::Object(_)) => Ok(data),
            _ => bail!(
                ErrorKind::WriteFailed,
                "Entry is not a mapping",
                entry.entry
            ),
        }
    }

    fn record_id(&self, data: &Value) -> EtlResult<RecordId> {
        RecordId::extract(data, self.strategy).ok_or_else(|| {
            etl_error!(ErrorKind::ValidationError, "Entry has no id", data)
        })
    }

    fn check_configured(&self) -> EtlResult<()> {
        if !self.insert && !self.update {
            bail!(
                ErrorKind::WriterMisconfigured,
                "Writer wrongly configured to not insert and to not update"
            );
        }

        Ok(())
    }

    /// Merges `data` over the stored record and saves the result.
    async fn do_update(&self, data: &Value) -> Result<Value, ServiceError> {
        let id = RecordId::extract(data, self.strategy).ok_or_else(|| {
            ServiceError::Validation(
                serde_json::json!({"id": ["Missing data for required field."]}),
            )
        })?;
        let current = self.service.read(&self.identity, &id).await?;
        let merged = merge(current, data);

        self.service.update(&self.identity, &id, merged).await
    }
}

/// Shallow merge: keys of `incoming` replace the ones of `current`.
fn merge(current: Value, incoming: &Value) -> Value {
    match (current, incoming) {
        (Value::Object(mut current), Value::Object(incoming)) => {
            for (key, value) in incoming {
                current.insert(key.clone(), value.clone());
            }
            Value::Object(current)
        }
        (_, incoming) => incoming.clone(),
    }
}

#[async_trait]
impl Writer for ServiceWriter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn write(&self, entry: &StreamEntry) -> EtlResult<StreamEntry> {
        self.check_configured()?;
        let data = Self::data(entry)?;

        if self.insert {
            match self.service.create(&self.identity, data.clone()).await {
                Ok(record) => return Ok(entry.clone().with_record(record, Some(OpType::Created))),
                Err(ServiceError::AlreadyExists(id)) => {
                    if !self.update {
                        bail!(
                            ErrorKind::EntryAlreadyExists,
                            "Vocabulary entry already exists",
                            data
                        );
                    }
                    debug!(%id, "entry exists, updating");
                }
                Err(err) => return Err(err.into()),
            }
        }

        match self.do_update(data).await {
            Ok(record) => Ok(entry.clone().with_record(record, Some(OpType::Updated))),
            Err(ServiceError::NotFound(_)) => bail!(
                ErrorKind::EntryDoesNotExist,
                "Vocabulary entry does not exist",
                data
            ),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_many(&self, entries: Vec<StreamEntry>) -> EtlResult<Vec<StreamEntry>> {
        self.check_configured()?;

        // Entries without a usable key fail on their own and are left out of the bulk call.
        let mut keyed: Vec<Result<(RecordId, Value), EtlError>> = Vec::with_capacity(entries.len());
        for entry in &entries {
            keyed.push(Self::data(entry).and_then(|data| {
                let id = self.record_id(data)?;
                Ok((id, data.clone()))
            }));
        }

        let items: Vec<_> = keyed
            .iter()
            .filter_map(|item| item.as_ref().ok().cloned())
            .collect();
        let sent = items.len();
        let results = self
            .service
            .create_or_update_many(&self.identity, items)
            .await?;

        if results.len() != sent {
            bail!(
                ErrorKind::WriteFailed,
                "Record service returned a wrong number of results",
                format!("expected {sent}, got {}", results.len())
            );
        }

        let mut results = results.into_iter();
        let mut written = Vec::with_capacity(entries.len());
        for (entry, item) in entries.into_iter().zip(keyed) {
            if let Err(err) = item {
                written.push(entry.with_stage_error(self.name(), &err));
                continue;
            }

            // Lengths were checked above.
            let Some(result) = results.next() else {
                break;
            };
            let mut entry = entry;
            entry.record = result.record;
            entry.op_type = result.op_type;
            entry.exc = result.exc;
            for error in result.errors {
                entry = entry.with_error(format!("{}: {error}", self.name()));
            }
            written.push(entry);
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MemoryRecordService;
    use serde_json::json;

    fn writer(service: &MemoryRecordService, insert: bool, update: bool) -> ServiceWriter {
        ServiceWriter::new(
            Arc::new(service.clone()),
            insert,
            update,
            IdStrategy::TypeAndId,
        )
    }

    fn entry() -> StreamEntry {
        StreamEntry::new(json!({"id": "eng", "type": "languages", "title": {"en": "English"}}))
    }

    #[tokio::test]
    async fn inserts_new_entries() {
        let service = MemoryRecordService::default();

        let result = writer(&service, true, false).write(&entry()).await.unwrap();

        assert_eq!(result.op_type, Some(OpType::Created));
        assert_eq!(result.record.as_ref(), entry().value());
        assert_eq!(service.len().await, 1);
    }

    #[tokio::test]
    async fn insert_twice_without_update_fails() {
        let service = MemoryRecordService::default();
        let writer = writer(&service, true, false);
        writer.write(&entry()).await.unwrap();

        let err = writer.write(&entry()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EntryAlreadyExists);
        assert_eq!(
            err.message(),
            r#"Vocabulary entry already exists: {"id":"eng","type":"languages","title":{"en":"English"}}"#
        );
    }

    #[tokio::test]
    async fn insert_with_update_merges_existing_record() {
        let service = MemoryRecordService::default();
        let writer = writer(&service, true, true);
        service
            .create(
                &Identity::system(),
                json!({"id": "eng", "type": "languages", "tags": ["old"], "title": {"en": "Eng"}}),
            )
            .await
            .unwrap();

        let result = writer.write(&entry()).await.unwrap();

        assert_eq!(result.op_type, Some(OpType::Updated));
        assert_eq!(
            service.get(&RecordId::typed("languages", "eng")).await,
            Some(json!({"id": "eng", "type": "languages", "tags": ["old"], "title": {"en": "English"}}))
        );
    }

    #[tokio::test]
    async fn update_only_requires_existing_record() {
        let service = MemoryRecordService::default();

        let err = writer(&service, false, true).write(&entry()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EntryDoesNotExist);
        assert!(err.message().starts_with("Vocabulary entry does not exist: {"));
        assert!(service.is_empty().await);
    }

    #[tokio::test]
    async fn neither_insert_nor_update_is_misconfigured() {
        let service = MemoryRecordService::default();

        let err = writer(&service, false, false).write(&entry()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WriterMisconfigured);
        assert_eq!(
            err.message(),
            "Writer wrongly configured to not insert and to not update"
        );
    }

    #[tokio::test]
    async fn validation_errors_keep_their_messages() {
        let service = MemoryRecordService::default().with_validator(|_| {
            Err(ServiceError::Validation(json!({"title": ["Not a valid mapping."]})))
        });

        let err = writer(&service, true, false).write(&entry()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(err.message().contains("Not a valid mapping."));
    }

    #[tokio::test]
    async fn write_many_maps_results_by_position() {
        let service = MemoryRecordService::new(IdStrategy::IdOnly).with_validator(|data| {
            match data.get("name") {
                Some(_) => Ok(()),
                None => Err(ServiceError::Validation(json!({"name": ["Missing"]}))),
            }
        });
        let writer = ServiceWriter::new(Arc::new(service.clone()), true, false, IdStrategy::IdOnly);

        let results = writer
            .write_many(vec![
                StreamEntry::new(json!({"id": "a", "name": "A"})),
                StreamEntry::new(json!({"name": "no id"})),
                StreamEntry::new(json!({"id": "c"})),
                StreamEntry::new(json!({"id": "d", "name": "D"})),
            ])
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].op_type, Some(OpType::Created));
        assert_eq!(results[1].errors.len(), 1);
        assert!(results[1].errors[0].starts_with("ServiceWriter: Entry has no id"));
        assert!(results[2].has_errors());
        assert!(results[2].exc.is_some());
        assert_eq!(results[3].record, Some(json!({"id": "d", "name": "D"})));
        assert_eq!(service.len().await, 2);
    }

    #[tokio::test]
    async fn write_many_fails_when_store_is_down() {
        let service = MemoryRecordService::default();
        service.set_available(false).await;

        let err = writer(&service, true, false)
            .write_many(vec![entry()])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationConnectionFailed);
    }

    #[test]
    fn merge_is_shallow() {
        let merged = merge(
            json!({"a": 1, "b": {"x": 1}}),
            &json!({"b": {"y": 2}, "c": 3}),
        );

        assert_eq!(merged, json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }
}
