//! Error types for the embedded connector runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Result type alias for offset storage operations.
pub type OffsetResult<T> = Result<T, OffsetError>;

/// Result type alias for connector and task plugin operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors that end a run of the embedded connector.
///
/// Flush failures never show up here: they are logged and retried on the
/// next commit.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Configuration is missing a required field or holds an invalid value
    #[error("Invalid connector configuration: {0}")]
    Config(#[from] ConfigError),

    /// No factory is registered for the configured connector class
    #[error("Unknown connector class: {0}")]
    UnknownConnectorClass(String),

    /// Connector or task failed to initialize, start, or poll
    #[error("Connector task failed: {0}")]
    Task(#[from] TaskError),

    /// Offset store could not be started
    #[error("Offset storage error: {0}")]
    Offset(#[from] OffsetError),

    /// The record consumer returned an error
    #[error("Record delivery failed: {0}")]
    Delivery(#[source] anyhow::Error),

    /// Builder was missing a required part
    #[error("Cannot build connector: {0}")]
    Build(&'static str),
}

/// Configuration errors, detected before the connector starts polling.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A property could not be parsed into its expected type
    #[error("Invalid value '{value}' for '{field}'")]
    InvalidValue { field: &'static str, value: String },

    /// Field-level validation failed
    #[error("{0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Errors raised by offset converters and backing stores.
#[derive(Error, Debug)]
pub enum OffsetError {
    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bytes could not be decoded
    #[error("Corrupt offset data: {0}")]
    Corrupt(String),

    /// `begin_flush` was called while another flush was still pending
    #[error("Offset flush already in progress")]
    FlushInProgress,

    /// The background flush task was aborted or panicked
    #[error("Offset flush task failed: {0}")]
    FlushAborted(String),

    /// Generic error with context
    #[error("Offset storage error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Errors raised by source connectors and tasks.
#[derive(Error, Debug)]
pub enum TaskError {
    /// The poll was interrupted; this is the forced-shutdown signal, not a failure
    #[error("Task was interrupted")]
    Interrupted,

    /// The connector produced no task configuration
    #[error("Connector '{0}' produced no task configuration")]
    NoTaskConfig(String),

    /// Reading committed offsets failed
    #[error("Offset read failed: {0}")]
    Offset(#[from] OffsetError),

    /// Connector-specific failure
    #[error("{0}")]
    Failed(#[from] anyhow::Error),
}

impl TaskError {
    /// Whether this error is the interruption signal rather than a failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TaskError::Interrupted)
    }
}
