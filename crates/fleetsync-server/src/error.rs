//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::import::{ImportError, StoreError};

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FleetSync error: {0}")]
    Fleet(#[from] fleetsync_common::FleetError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Store(StoreError::NotFound(id)) => {
                AppError::NotFound(format!("Import job {id} not found"))
            },
            ImportError::Store(StoreError::Conflict { .. })
            | ImportError::Store(StoreError::InvalidTransition { .. }) => {
                AppError::Conflict(err.to_string())
            },
            ImportError::Store(StoreError::Database(e)) => AppError::Database(e),
            ImportError::Store(e) => AppError::Internal(e.to_string()),
            ImportError::InvalidRequest(message) => AppError::Validation(message),
            ImportError::InvalidState { .. } | ImportError::AlreadyActive(_) => {
                AppError::Conflict(err.to_string())
            },
            ImportError::NoBackup(_) | ImportError::BackupMissing(_) => {
                AppError::Unprocessable(err.to_string())
            },
            ImportError::Client(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A database error occurred".to_string())
            },
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::Validation(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
            AppError::Config(ref message) => {
                tracing::error!("Configuration error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error".to_string())
            },
            AppError::Io(ref e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "An IO error occurred".to_string())
            },
            AppError::Fleet(ref e) => {
                tracing::error!("FleetSync error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            },
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Conflict(ref message) => (StatusCode::CONFLICT, message.clone()),
            AppError::Unprocessable(ref message) => {
                (StatusCode::UNPROCESSABLE_ENTITY, message.clone())
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::JobStatus;
    use uuid::Uuid;

    fn status_of(err: ImportError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_import_error_status_codes() {
        let id = Uuid::new_v4();
        assert_eq!(status_of(StoreError::NotFound(id).into()), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ImportError::InvalidRequest("batchSize".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ImportError::invalid_state(id, JobStatus::Completed, "pause")),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(ImportError::AlreadyActive(id)), StatusCode::CONFLICT);
        assert_eq!(status_of(ImportError::NoBackup(id)), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status_of(StoreError::Unavailable("down".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
