//! Error types for logid

use logi_ledger::{AuditError, LedgerError, StorageError};
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Audit sink could not be set up
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(value: config::ConfigError) -> Self {
        DaemonError::Config(value.to_string())
    }
}

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_keep_their_message() {
        let err: DaemonError = LedgerError::NotFound("tunnel 'T1'".to_string()).into();
        assert_eq!(err.to_string(), "Ledger error: Not found: tunnel 'T1'");
    }
}
