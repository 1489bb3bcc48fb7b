//! Error types for the ledger engine

use thiserror::Error;

/// Errors returned to the caller of a ledger operation
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Tunnel, order or facility absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Tunnel names are unique across every facility
    #[error("Tunnel '{tunnel}' already exists in facility '{facility}'")]
    DuplicateTunnel { tunnel: String, facility: String },

    /// Order status outside the enumerated set
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Negative or non-finite quantity, rate or amount
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// The caller's capability does not allow the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A completed order no longer accepts transitions
    #[error("Order {0} is already complete")]
    OrderClosed(String),

    /// The rendered content behind a display handle disappeared
    #[error("Stale display handle: {0}")]
    StaleDisplayHandle(String),

    /// Writing the war archive failed; the reset was aborted
    #[error("Archive failure: {0}")]
    ArchiveFailure(String),

    /// The storage layer rejected a read or write
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StorageError),
}

/// Storage backend errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend refused the write
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// Stored document exists but holds nothing readable
    #[error("Corrupt document: {0}")]
    Corrupt(String),
}

/// Errors raised while talking to an external display surface
#[derive(Debug, Clone, Error)]
pub enum DisplayError {
    /// The content referenced by a handle no longer exists
    #[error("Content missing: {0}")]
    ContentMissing(String),

    /// The surface did not answer within the configured bound
    #[error("Display I/O timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors raised by audit sinks
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by archive writers
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bundle already exists: {0}")]
    AlreadyExists(String),
}

impl From<ArchiveError> for LedgerError {
    fn from(value: ArchiveError) -> Self {
        LedgerError::ArchiveFailure(value.to_string())
    }
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_tunnel_names_owner() {
        let err = LedgerError::DuplicateTunnel {
            tunnel: "T1".to_string(),
            facility: "Facility A".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Tunnel 'T1' already exists in facility 'Facility A'"
        );
    }

    #[test]
    fn test_storage_error_converts_to_persistence_failure() {
        let err: LedgerError = StorageError::WriteRejected("disk full".to_string()).into();
        assert!(matches!(err, LedgerError::PersistenceFailure(_)));
    }
}
