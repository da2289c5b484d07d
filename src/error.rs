//! Error types. Synchronous calls fail with a [`ConfigError`], persistence and observer failures
//! never reach the caller of a synchronous operation and are only reported through the `log`
//! facade.

use thiserror::Error;

/// The error returned by the synchronous configuration API.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// The API was called in a way that can never succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("the configuration does not contain a 'default' category")]
    MissingDefaultCategory,
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("a storage backend is still being attached")]
    StorageAttachInFlight,
}

/// The logging backend rejected a configuration. The previously committed configuration stays
/// active when this is returned.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("the configuration does not contain a 'default' category")]
    MissingDefaultCategory,
    #[error("category '{0}' does not have any appenders")]
    NoAppenders(String),
    #[error("category '{category}' references unknown appender '{appender}'")]
    UnknownAppender { category: String, appender: String },
    #[error("appender '{appender}' is invalid: {reason}")]
    InvalidAppender { appender: String, reason: String },
    #[error("could not open '{path}' for appender '{appender}' ({error})")]
    AppenderIo {
        appender: String,
        path: String,
        error: std::io::Error,
    },
    #[error("{0}")]
    Rejected(String),
}

/// Reading or writing the persisted configuration failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("could not read '{key}' from storage: {message}")]
    Read { key: String, message: String },
    #[error("could not write '{key}' to storage: {message}")]
    Write { key: String, message: String },
    #[error("invalid persisted configuration: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("the persisted configuration was rejected: {0}")]
    Rejected(#[source] ConfigError),
    #[error("the storage writer has stopped")]
    WriterStopped,
}

/// An error raised when installing the process-wide configurator.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("a logging configurator has already been installed")]
    AlreadyInstalled,
    #[error(transparent)]
    Config(#[from] ConfigError),
}
