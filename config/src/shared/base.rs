use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A datastream needs something to read from.
    #[error("At least one reader must be configured")]
    NoReaders,

    /// A datastream needs somewhere to write to.
    #[error("At least one writer must be configured")]
    NoWriters,

    /// Batches must hold at least one entry.
    #[error("`batch_size` cannot be zero")]
    BatchSizeZero,

    /// A component spec without a `type`.
    #[error("{0} at position {1} has an empty `type`")]
    EmptyComponentType(&'static str, usize),

    /// Component arguments must be a mapping.
    #[error("{0} `{1}` must have a mapping as `args`")]
    InvalidComponentArgs(&'static str, String),

    /// General configuration validation error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors that can occur when reading a datastream configuration from YAML.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
}
