//! Error types for polystore

use std::fmt;

/// Result type alias for polystore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for polystore
#[derive(Debug)]
pub enum Error {
    /// Configuration errors
    Config(String),
    /// Directory read/write errors
    Directory(String),
    /// Serialization errors
    Serialization(String),
    /// Malformed batch or path data
    InvalidData(String),
    /// Fatal adapter construction failure (connectivity or kind mismatch)
    StorageInitialization(String),
    /// No storage engine can accept a new storage unit
    NoAvailableEngine,
    /// Conflicting directory update (e.g. overlapping owned fragments)
    Conflict(String),
    /// Namespace is not registered in the directory
    UnknownNamespace(String),
    /// A physical task failed and the caller chose to abort the request
    Task(TaskError),
    /// Internal error
    Internal(String),
}

/// Per-task failure, returned inside a `TaskResult` rather than thrown
/// across the executor boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task's operator combination is not supported by the adapter;
    /// a plan generator bug or misconfiguration upstream.
    NonExecutable(String),
    /// A recoverable-looking failure during an otherwise valid call
    /// (timeout, missing container, empty result where one was required).
    ExecuteFailure(String),
    /// Catch-all for backend client failures, carrying the underlying cause.
    Backend { message: String, cause: String },
}

impl TaskError {
    pub fn non_executable(message: impl Into<String>) -> Self {
        TaskError::NonExecutable(message.into())
    }

    pub fn execute_failure(message: impl Into<String>) -> Self {
        TaskError::ExecuteFailure(message.into())
    }

    pub fn backend(message: impl Into<String>, cause: impl fmt::Display) -> Self {
        TaskError::Backend {
            message: message.into(),
            cause: cause.to_string(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::NonExecutable(msg) => write!(f, "non-executable physical task: {}", msg),
            TaskError::ExecuteFailure(msg) => write!(f, "physical task failed: {}", msg),
            TaskError::Backend { message, cause } => {
                write!(f, "backend error: {}: {}", message, cause)
            }
        }
    }
}

impl std::error::Error for TaskError {}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Task(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Directory(msg) => write!(f, "Directory error: {}", msg),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Error::StorageInitialization(msg) => {
                write!(f, "Storage initialization failed: {}", msg)
            }
            Error::NoAvailableEngine => {
                write!(f, "No storage engine is available to host a new storage unit")
            }
            Error::Conflict(msg) => write!(f, "Directory conflict: {}", msg),
            Error::UnknownNamespace(name) => write!(f, "Unknown namespace: {}", name),
            Error::Task(e) => write!(f, "Task error: {}", e),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<TaskError> for Error {
    fn from(e: TaskError) -> Self {
        Error::Task(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
