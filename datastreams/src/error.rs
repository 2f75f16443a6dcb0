use std::error;
use std::fmt;

/// Convenient result type for datastream operations using [`EtlError`] as the error type.
pub type EtlResult<T> = Result<T, EtlError>;

/// Main error type for datastream operations.
///
/// [`EtlError`] can represent single errors, errors with additional detail, or multiple
/// aggregated errors. Every error carries an [`ErrorKind`], and every kind belongs to an
/// [`ErrorCategory`] which decides whether the orchestrator contains the error at the level of
/// a single entry or lets it end the run.
#[derive(Debug, Clone)]
pub struct EtlError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Error with kind and static description
    WithDescription(ErrorKind, &'static str),
    /// Error with kind, static description, and dynamic detail
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    /// Multiple aggregated errors
    Many(Vec<EtlError>),
}

/// Stage a failure belongs to.
///
/// The first four categories are contained by the orchestrator and recorded on the entry that
/// caused them. [`ErrorCategory::Other`] aborts the run.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ErrorCategory {
    Reader,
    Transformer,
    Writer,
    Factory,
    Other,
}

/// Specific categories of errors that can occur while streaming vocabularies.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Reader Errors
    ReadFailed,
    ArchiveError,
    DecodingError,
    HttpStatusError,
    NoRecordsMatch,
    UnexpectedRemoteContent,

    // Transformer Errors
    TransformationFailed,
    MissingField,
    InvalidIdentifier,

    // Writer Errors
    EntryAlreadyExists,
    EntryDoesNotExist,
    ValidationError,
    InvalidRelation,
    WriterMisconfigured,
    WriteFailed,

    // Factory Errors
    ComponentNotConfigured,
    InvalidComponentArgs,

    // Configuration & Programming Errors
    ConfigError,
    UnsupportedReaderMode,
    InvalidState,

    // IO & Serialization Errors
    IoError,
    SerializationError,
    DeserializationError,

    // Connection Errors
    SourceConnectionFailed,
    DestinationConnectionFailed,

    // Unknown / Uncategorized
    Unknown,
}

impl ErrorKind {
    /// Returns the stage this kind of error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::ReadFailed
            | ErrorKind::ArchiveError
            | ErrorKind::DecodingError
            | ErrorKind::HttpStatusError
            | ErrorKind::NoRecordsMatch
            | ErrorKind::UnexpectedRemoteContent => ErrorCategory::Reader,
            ErrorKind::TransformationFailed
            | ErrorKind::MissingField
            | ErrorKind::InvalidIdentifier => ErrorCategory::Transformer,
            ErrorKind::EntryAlreadyExists
            | ErrorKind::EntryDoesNotExist
            | ErrorKind::ValidationError
            | ErrorKind::InvalidRelation
            | ErrorKind::WriterMisconfigured
            | ErrorKind::WriteFailed => ErrorCategory::Writer,
            ErrorKind::ComponentNotConfigured | ErrorKind::InvalidComponentArgs => {
                ErrorCategory::Factory
            }
            ErrorKind::ConfigError
            | ErrorKind::UnsupportedReaderMode
            | ErrorKind::InvalidState
            | ErrorKind::IoError
            | ErrorKind::SerializationError
            | ErrorKind::DeserializationError
            | ErrorKind::SourceConnectionFailed
            | ErrorKind::DestinationConnectionFailed
            | ErrorKind::Unknown => ErrorCategory::Other,
        }
    }
}

impl EtlError {
    /// Creates an [`EtlError`] containing multiple aggregated errors.
    pub fn many(errors: Vec<EtlError>) -> EtlError {
        EtlError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }

    /// Returns the stage category of this error, see [`ErrorKind::category`].
    pub fn category(&self) -> ErrorCategory {
        self.kind().category()
    }

    /// Returns `true` when the orchestrator records this error on the offending entry instead
    /// of aborting the run.
    ///
    /// Aggregated errors are entry-scoped only if every inner error is.
    pub fn is_entry_scoped(&self) -> bool {
        match self.repr {
            ErrorRepr::Many(ref errors) => {
                !errors.is_empty() && errors.iter().all(|err| err.is_entry_scoped())
            }
            _ => self.category() != ErrorCategory::Other,
        }
    }

    /// Returns the human readable message recorded on stream entries.
    ///
    /// This is the description, followed by the detail when there is one, without the kind.
    pub fn message(&self) -> String {
        match self.repr {
            ErrorRepr::WithDescription(_, desc) => desc.to_string(),
            ErrorRepr::WithDescriptionAndDetail(_, desc, ref detail) => {
                format!("{desc}: {detail}")
            }
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .map(|err| err.message())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for EtlError {}

/// Creates an [`EtlError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for EtlError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

/// Creates an [`EtlError`] from an error kind, static description, and dynamic detail.
impl From<(ErrorKind, &'static str, String)> for EtlError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

/// Creates an [`EtlError`] from a vector of errors for aggregation.
impl<E> From<Vec<E>> for EtlError
where
    E: Into<EtlError>,
{
    fn from(errors: Vec<E>) -> EtlError {
        EtlError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

/// Converts [`std::io::Error`] to [`EtlError`] with [`ErrorKind::IoError`].
///
/// Readers that can attribute an I/O failure to a single item map it to a reader kind
/// themselves; anything reaching this conversion is fatal for the run.
impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`serde_json::Error`] to [`EtlError`] with appropriate error kind.
impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> EtlError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Converts [`serde_yaml::Error`] to [`EtlError`] with [`ErrorKind::SerializationError`].
impl From<serde_yaml::Error> for EtlError {
    fn from(err: serde_yaml::Error) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::SerializationError,
                "YAML serialization failed",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`csv::Error`] to [`EtlError`] with [`ErrorKind::DecodingError`].
impl From<csv::Error> for EtlError {
    fn from(err: csv::Error) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::DecodingError,
                "CSV decoding failed",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`zip::result::ZipError`] to [`EtlError`] with [`ErrorKind::ArchiveError`].
impl From<zip::result::ZipError> for EtlError {
    fn from(err: zip::result::ZipError) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ArchiveError,
                "ZIP archive could not be read",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`quick_xml::Error`] to [`EtlError`] with [`ErrorKind::DecodingError`].
impl From<quick_xml::Error> for EtlError {
    fn from(err: quick_xml::Error) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::DecodingError,
                "XML decoding failed",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`reqwest::Error`] to [`EtlError`].
///
/// Transport failures are not attributable to one entry and stay fatal.
impl From<reqwest::Error> for EtlError {
    fn from(err: reqwest::Error) -> EtlError {
        let (kind, description) = if err.is_decode() {
            (
                ErrorKind::DeserializationError,
                "HTTP response body could not be decoded",
            )
        } else {
            (ErrorKind::SourceConnectionFailed, "HTTP request failed")
        };

        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Converts configuration validation failures to [`ErrorKind::ConfigError`].
impl From<datastreams_config::shared::ValidationError> for EtlError {
    fn from(err: datastreams_config::shared::ValidationError) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigError,
                "Invalid datastream configuration",
                err.to_string(),
            ),
        }
    }
}

/// Converts configuration loading failures to [`ErrorKind::ConfigError`].
impl From<datastreams_config::shared::ConfigLoadError> for EtlError {
    fn from(err: datastreams_config::shared::ConfigLoadError) -> EtlError {
        EtlError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigError,
                "Datastream configuration could not be loaded",
                err.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, etl_error};

    #[test]
    fn test_simple_error_creation() {
        let err = EtlError::from((ErrorKind::TransformationFailed, "Value cannot be negative"));
        assert_eq!(err.kind(), ErrorKind::TransformationFailed);
        assert_eq!(err.detail(), None);
        assert_eq!(err.message(), "Value cannot be negative");
    }

    #[test]
    fn test_error_with_detail() {
        let err = EtlError::from((
            ErrorKind::EntryAlreadyExists,
            "Vocabulary entry already exists",
            r#"{"id":"eng"}"#.to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::EntryAlreadyExists);
        assert_eq!(err.detail(), Some(r#"{"id":"eng"}"#));
        assert_eq!(
            err.message(),
            r#"Vocabulary entry already exists: {"id":"eng"}"#
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(ErrorKind::DecodingError.category(), ErrorCategory::Reader);
        assert_eq!(
            ErrorKind::MissingField.category(),
            ErrorCategory::Transformer
        );
        assert_eq!(ErrorKind::InvalidRelation.category(), ErrorCategory::Writer);
        assert_eq!(
            ErrorKind::ComponentNotConfigured.category(),
            ErrorCategory::Factory
        );
        assert_eq!(
            ErrorKind::SourceConnectionFailed.category(),
            ErrorCategory::Other
        );
    }

    #[test]
    fn test_entry_scoped() {
        assert!(etl_error!(ErrorKind::WriteFailed, "Write failed").is_entry_scoped());
        assert!(!etl_error!(ErrorKind::IoError, "Disk gone").is_entry_scoped());

        let mixed = EtlError::many(vec![
            etl_error!(ErrorKind::WriteFailed, "Write failed"),
            etl_error!(ErrorKind::IoError, "Disk gone"),
        ]);
        assert!(!mixed.is_entry_scoped());
        assert!(!EtlError::many(vec![]).is_entry_scoped());
    }

    #[test]
    fn test_multiple_errors() {
        let errors = vec![
            EtlError::from((ErrorKind::ValidationError, "Invalid schema")),
            EtlError::from((ErrorKind::DecodingError, "Bad JSON", "a.json".to_string())),
        ];
        let multi_err = EtlError::many(errors);

        assert_eq!(multi_err.kind(), ErrorKind::ValidationError);
        assert_eq!(
            multi_err.kinds(),
            vec![ErrorKind::ValidationError, ErrorKind::DecodingError]
        );
        assert_eq!(multi_err.detail(), Some("a.json"));
        assert_eq!(multi_err.message(), "Invalid schema; Bad JSON: a.json");
    }

    #[test]
    fn test_empty_multiple_errors() {
        let multi_err = EtlError::many(vec![]);
        assert_eq!(multi_err.kind(), ErrorKind::Unknown);
        assert_eq!(multi_err.kinds(), vec![]);
        assert_eq!(multi_err.detail(), None);
    }

    #[test]
    fn test_error_display_with_detail() {
        let err = EtlError::from((
            ErrorKind::DecodingError,
            "Failed to decode JSON",
            "bad.json: EOF while parsing".to_string(),
        ));
        let display_str = format!("{err}");
        assert!(display_str.contains("DecodingError"));
        assert!(display_str.contains("Failed to decode JSON"));
        assert!(display_str.contains("bad.json"));
    }

    #[test]
    fn test_macro_usage() {
        fn fails() -> EtlResult<()> {
            bail!(ErrorKind::MissingField, "Name not found in ROR entry.");
        }

        let err = fails().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);

        let err_with_detail = etl_error!(ErrorKind::ConfigError, "Bad config", 42);
        assert_eq!(err_with_detail.detail(), Some("42"));
    }

    #[test]
    fn test_json_error_conversion() {
        let err: EtlError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(!err.is_entry_scoped());
    }
}
