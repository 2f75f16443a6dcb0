use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::service::base::{
    BulkResult, IdStrategy, Identity, RecordId, RecordService, ServiceError,
};
use crate::types::OpType;

/// Validation hook run before every create and update.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), ServiceError> + Send + Sync>;

#[derive(Debug)]
struct Inner {
    records: BTreeMap<RecordId, Value>,
    /// Vocabulary type id to pid type.
    types: BTreeMap<String, String>,
    available: bool,
}

/// A [`RecordService`] keeping records in memory.
///
/// Used by tests, fixtures and dry runs of the importer. Clones share the same records.
#[derive(Clone)]
pub struct MemoryRecordService {
    inner: Arc<Mutex<Inner>>,
    strategy: IdStrategy,
    validator: Option<Validator>,
}

impl MemoryRecordService {
    pub fn new(strategy: IdStrategy) -> Self {
        let inner = Inner {
            records: BTreeMap::new(),
            types: BTreeMap::new(),
            available: true,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
            strategy,
            validator: None,
        }
    }

    /// Installs a validation hook, e.g. a schema check.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Makes every following call fail with [`ServiceError::Unavailable`] until re-enabled.
    pub async fn set_available(&self, available: bool) {
        self.inner.lock().await.available = available;
    }

    pub async fn get(&self, id: &RecordId) -> Option<Value> {
        self.inner.lock().await.records.get(id).cloned()
    }

    pub async fn records(&self) -> Vec<(RecordId, Value)> {
        let inner = self.inner.lock().await;
        inner
            .records
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Returns the pid type registered for the vocabulary type `id`.
    pub async fn pid_type(&self, id: &str) -> Option<String> {
        self.inner.lock().await.types.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(inner: &Inner) -> Result<(), ServiceError> {
        if inner.available {
            Ok(())
        } else {
            Err(ServiceError::Unavailable("memory store disabled".to_string()))
        }
    }

    fn validate(&self, data: &Value) -> Result<(), ServiceError> {
        if !data.is_object() {
            return Err(ServiceError::Validation(
                json!({"_schema": ["Invalid input type."]}),
            ));
        }

        match &self.validator {
            Some(validator) => validator(data),
            None => Ok(()),
        }
    }

    fn record_id(&self, data: &Value) -> Result<RecordId, ServiceError> {
        RecordId::extract(data, self.strategy).ok_or_else(|| {
            ServiceError::Validation(json!({"id": ["Missing data for required field."]}))
        })
    }
}

impl Default for MemoryRecordService {
    fn default() -> Self {
        Self::new(IdStrategy::default())
    }
}

impl fmt::Debug for MemoryRecordService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRecordService")
            .field("strategy", &self.strategy)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

#[async_trait]
impl RecordService for MemoryRecordService {
    async fn create(&self, _identity: &Identity, data: Value) -> Result<Value, ServiceError> {
        let mut inner = self.inner.lock().await;
        Self::check_available(&inner)?;
        self.validate(&data)?;

        let id = self.record_id(&data)?;
        if inner.records.contains_key(&id) {
            return Err(ServiceError::AlreadyExists(id));
        }

        debug!(%id, "creating record");
        inner.records.insert(id, data.clone());

        Ok(data)
    }

    async fn read(&self, _identity: &Identity, id: &RecordId) -> Result<Value, ServiceError> {
        let inner = self.inner.lock().await;
        Self::check_available(&inner)?;

        inner
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(id.clone()))
    }

    async fn update(
        &self,
        _identity: &Identity,
        id: &RecordId,
        data: Value,
    ) -> Result<Value, ServiceError> {
        let mut inner = self.inner.lock().await;
        Self::check_available(&inner)?;
        self.validate(&data)?;

        match inner.records.get_mut(id) {
            Some(record) => {
                debug!(%id, "updating record");
                *record = data.clone();
                Ok(data)
            }
            None => Err(ServiceError::NotFound(id.clone())),
        }
    }

    async fn create_type(
        &self,
        _identity: &Identity,
        id: &str,
        pid_type: &str,
    ) -> Result<Value, ServiceError> {
        let mut inner = self.inner.lock().await;
        Self::check_available(&inner)?;

        match inner.types.get(id) {
            Some(existing) if existing != pid_type => {
                return Err(ServiceError::AlreadyExists(RecordId::new(id)));
            }
            Some(_) => {}
            None => {
                info!(id, pid_type, "creating vocabulary type");
                inner.types.insert(id.to_string(), pid_type.to_string());
            }
        }

        Ok(json!({"id": id, "pid_type": pid_type}))
    }

    async fn create_or_update_many(
        &self,
        _identity: &Identity,
        items: Vec<(RecordId, Value)>,
    ) -> Result<Vec<BulkResult>, ServiceError> {
        let mut inner = self.inner.lock().await;
        Self::check_available(&inner)?;
        info!("writing a batch of {} records", items.len());

        let results = items
            .into_iter()
            .map(|(id, data)| {
                if let Err(err) = self.validate(&data) {
                    return BulkResult::failed(data, &err);
                }

                let op_type = if inner.records.contains_key(&id) {
                    OpType::Updated
                } else {
                    OpType::Created
                };
                inner.records.insert(id, data.clone());

                BulkResult::written(data, op_type)
            })
            .collect();

        Ok(results)
    }
}
