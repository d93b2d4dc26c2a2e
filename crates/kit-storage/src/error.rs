// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Storage error type
#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    /// Record not found
    #[error("Record not found: {key}")]
    #[diagnostic(
        code(kit::storage::not_found),
        help("The record may have been deleted; fetch it again before retrying")
    )]
    NotFound {
        #[allow(unused)]
        key: String,
    },

    /// Record already exists
    #[error("Record already exists: {key}")]
    #[diagnostic(
        code(kit::storage::already_exists),
        help("Use apply to update an existing record instead of create")
    )]
    AlreadyExists {
        #[allow(unused)]
        key: String,
    },

    /// Record failed validation before being written
    #[error("Invalid record {key}: {message}")]
    #[diagnostic(
        code(kit::storage::invalid_record),
        help("Record names must be lowercase DNS-1123 names")
    )]
    InvalidRecord {
        #[allow(unused)]
        key: String,
        #[allow(unused)]
        message: String,
    },

    /// Database error
    #[error("Database error: {message}")]
    #[diagnostic(
        code(kit::storage::database_error),
        help("Check that the data directory is accessible and no other process holds the database")
    )]
    DatabaseError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction error
    #[error("Transaction error: {message}")]
    #[diagnostic(
        code(kit::storage::transaction_error),
        help("Ensure the transaction is not already committed or aborted")
    )]
    TransactionError {
        #[allow(unused)]
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(kit::storage::serialization_error),
        help("The stored document no longer matches the record schema")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    pub fn invalid_record(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn database_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source,
        }
    }

    pub fn transaction_error(message: impl Into<String>) -> Self {
        Self::TransactionError {
            message: message.into(),
        }
    }

    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Whether the error means the record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::database_error(format!("redb error: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::database_error(format!("Failed to open database: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::transaction_error(format!("Transaction error: {}", err))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::database_error(format!("Storage error: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::database_error(format!("Table error: {}", err), Some(Box::new(err)))
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::transaction_error(format!("Commit error: {}", err))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization_error(format!("JSON error: {}", err), Some(Box::new(err)))
    }
}
