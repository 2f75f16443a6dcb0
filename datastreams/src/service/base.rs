use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::error::{ErrorKind, EtlError};
use crate::etl_error;
use crate::types::OpType;

/// The identity on whose behalf records are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
}

impl Identity {
    /// The identity used by imports, fixtures and background tasks.
    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
        }
    }
}

/// How the key of a record is extracted from its data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdStrategy {
    /// `(type, id)`, used by generic vocabularies sharing one store.
    #[default]
    TypeAndId,
    /// `id` alone, used by vocabularies with their own store.
    IdOnly,
}

/// Key of a vocabulary record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub vocabulary_type: Option<String>,
    pub id: String,
}

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            vocabulary_type: None,
            id: id.into(),
        }
    }

    pub fn typed(vocabulary_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            vocabulary_type: Some(vocabulary_type.into()),
            id: id.into(),
        }
    }

    /// Extracts the key of `data` with the given strategy.
    ///
    /// Returns `None` when `data` has no string `id`.
    pub fn extract(data: &Value, strategy: IdStrategy) -> Option<Self> {
        let id = data.get("id")?.as_str()?;

        match strategy {
            IdStrategy::IdOnly => Some(Self::new(id)),
            IdStrategy::TypeAndId => Some(Self {
                vocabulary_type: vocabulary_type(data),
                id: id.to_string(),
            }),
        }
    }
}

/// The vocabulary type of a record, given either as a plain string or as `{"id": ...}`.
fn vocabulary_type(data: &Value) -> Option<String> {
    match data.get("type")? {
        Value::String(type_) => Some(type_.clone()),
        Value::Object(type_) => type_.get("id")?.as_str().map(str::to_string),
        _ => None,
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.vocabulary_type {
            Some(vocabulary_type) => write!(f, "{vocabulary_type}/{}", self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Outcome of one item of [`RecordService::create_or_update_many`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkResult {
    pub record: Option<Value>,
    pub errors: Vec<String>,
    pub op_type: Option<OpType>,
    pub exc: Option<String>,
}

impl BulkResult {
    pub fn written(record: Value, op_type: OpType) -> Self {
        Self {
            record: Some(record),
            op_type: Some(op_type),
            ..Default::default()
        }
    }

    pub fn failed(record: Value, error: &ServiceError) -> Self {
        Self {
            record: Some(record),
            errors: vec![error.to_string()],
            exc: Some(format!("{error:?}")),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.exc.is_none()
    }
}

/// Failures reported by a [`RecordService`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ServiceError {
    #[error("Record {0} already exists")]
    AlreadyExists(RecordId),

    #[error("Record {0} does not exist")]
    NotFound(RecordId),

    /// Schema validation failed, the payload holds the messages per field.
    #[error("Validation failed: {0}")]
    Validation(Value),

    #[error("Invalid relation: {0}")]
    InvalidRelation(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<ServiceError> for EtlError {
    fn from(err: ServiceError) -> EtlError {
        match err {
            ServiceError::AlreadyExists(id) => {
                etl_error!(ErrorKind::EntryAlreadyExists, "Record already exists", id)
            }
            ServiceError::NotFound(id) => {
                etl_error!(ErrorKind::EntryDoesNotExist, "Record does not exist", id)
            }
            ServiceError::Validation(messages) => {
                etl_error!(ErrorKind::ValidationError, "Validation failed", messages)
            }
            ServiceError::InvalidRelation(detail) => {
                etl_error!(ErrorKind::InvalidRelation, "Invalid relation", detail)
            }
            ServiceError::Unavailable(detail) => etl_error!(
                ErrorKind::DestinationConnectionFailed,
                "Record service unavailable",
                detail
            ),
        }
    }
}

/// The record store consumed by the service writer.
#[async_trait]
pub trait RecordService: Send + Sync {
    /// Creates a record, failing with [`ServiceError::AlreadyExists`] on a key conflict.
    async fn create(&self, identity: &Identity, data: Value) -> Result<Value, ServiceError>;

    async fn read(&self, identity: &Identity, id: &RecordId) -> Result<Value, ServiceError>;

    /// Replaces the data of an existing record.
    async fn update(
        &self,
        identity: &Identity,
        id: &RecordId,
        data: Value,
    ) -> Result<Value, ServiceError>;

    /// Registers the vocabulary type `id`, whose records get persistent identifiers of
    /// `pid_type`.
    ///
    /// Registering a type again with the same `pid_type` succeeds. Another `pid_type` fails with
    /// [`ServiceError::AlreadyExists`].
    async fn create_type(
        &self,
        identity: &Identity,
        id: &str,
        pid_type: &str,
    ) -> Result<Value, ServiceError>;

    /// Creates or updates every item, returning one result per item in input order.
    ///
    /// Per-item failures are reported in the results. An `Err` means the whole batch failed.
    async fn create_or_update_many(
        &self,
        identity: &Identity,
        items: Vec<(RecordId, Value)>,
    ) -> Result<Vec<BulkResult>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_typed_ids() {
        let data = json!({"id": "eng", "type": "languages"});

        assert_eq!(
            RecordId::extract(&data, IdStrategy::TypeAndId),
            Some(RecordId::typed("languages", "eng"))
        );
        assert_eq!(
            RecordId::extract(&data, IdStrategy::IdOnly),
            Some(RecordId::new("eng"))
        );
    }

    #[test]
    fn extracts_type_given_as_mapping() {
        let data = json!({"id": "eng", "type": {"id": "languages"}});

        assert_eq!(
            RecordId::extract(&data, IdStrategy::TypeAndId).map(|id| id.to_string()),
            Some("languages/eng".to_string())
        );
    }

    #[test]
    fn missing_id_is_none() {
        assert_eq!(RecordId::extract(&json!({"type": "languages"}), IdStrategy::TypeAndId), None);
        assert_eq!(RecordId::extract(&json!({"id": 1}), IdStrategy::IdOnly), None);
    }

    #[test]
    fn service_errors_map_to_writer_kinds() {
        let err: EtlError = ServiceError::Validation(json!({"title": ["Missing data"]})).into();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(err.is_entry_scoped());
        assert_eq!(
            err.message(),
            r#"Validation failed: {"title":["Missing data"]}"#
        );

        let err: EtlError = ServiceError::Unavailable("down".to_string()).into();
        assert!(!err.is_entry_scoped());
    }
}
