//! Error types for the bookstore query runner

use thiserror::Error;

/// Result type alias for bookstore operations
pub type Result<T> = std::result::Result<T, BookstoreError>;

/// Unified error type for every store operation
///
/// All kinds are terminal for a run: nothing is retried and the first error
/// aborts the remaining steps.
#[derive(Error, Debug, Clone)]
pub enum BookstoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl BookstoreError {
    /// Returns true if the error came from reaching the store rather than from an operation
    pub fn is_connection(&self) -> bool {
        matches!(self, BookstoreError::Connection(_))
    }

    /// Returns true if the error was raised before anything was sent to the store
    pub fn is_validation(&self) -> bool {
        matches!(self, BookstoreError::Validation(_))
    }
}

impl From<serde_json::Error> for BookstoreError {
    fn from(err: serde_json::Error) -> Self {
        BookstoreError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for BookstoreError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::ServerSelection { .. }
            | ErrorKind::Io(_)
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Authentication { .. } => BookstoreError::Connection(err.to_string()),
            _ => BookstoreError::Query(err.to_string()),
        }
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for BookstoreError {
    fn from(err: bson::ser::Error) -> Self {
        BookstoreError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for BookstoreError {
    fn from(err: bson::de::Error) -> Self {
        BookstoreError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}
