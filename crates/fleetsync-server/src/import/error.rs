//! Import pipeline errors

use thiserror::Error;
use uuid::Uuid;

use super::client::ClientError;
use super::store::StoreError;
use super::types::JobStatus;

/// Result type alias for import operations
pub type ImportResult<T> = std::result::Result<T, ImportError>;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Invalid import request: {0}")]
    InvalidRequest(String),

    #[error("Cannot {action} job {id} while it is {status}")]
    InvalidState {
        id: Uuid,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Job {0} already has an active run")]
    AlreadyActive(Uuid),

    #[error("Job {0} has no backup to roll back to")]
    NoBackup(Uuid),

    #[error("Backup table {0} is missing")]
    BackupMissing(String),
}

impl ImportError {
    pub fn invalid_state(id: Uuid, status: JobStatus, action: &'static str) -> Self {
        ImportError::InvalidState { id, status, action }
    }
}
