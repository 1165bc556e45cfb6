use axum::http::StatusCode;
use thiserror::Error;

use crate::common::response::ApiError;
use crate::infrastructure::storage::StorageError;
use crate::modules::transcode::repository::JobStoreError;

/// Errors surfaced synchronously to HTTP callers.
///
/// Execution-time failures never travel through here; they are recorded on
/// the job record and observed by polling.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("a job for '{0}' already exists")]
    DuplicateSubmission(String),

    #[error("upload exceeds the {0} byte limit")]
    PayloadTooLarge(usize),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    RangeNotSatisfiable(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateSubmission(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => AppError::NotFound(format!("File not found: {}", key)),
            StorageError::RangeNotSatisfiable(key) => {
                AppError::RangeNotSatisfiable(format!("Requested range not satisfiable: {}", key))
            }
            StorageError::EmptyObject => AppError::Validation("Upload body is empty".to_string()),
            StorageError::StreamInterrupted(reason) => {
                AppError::Validation(format!("Upload stream interrupted: {}", reason))
            }
            other => AppError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<JobStoreError> for AppError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::Duplicate(id) => AppError::DuplicateSubmission(id),
            other => AppError::StorageUnavailable(format!("job store: {}", other)),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        let status = e.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", e);
        }
        ApiError(e.to_string(), status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_caller_facing_kinds() {
        let not_found: AppError = StorageError::NotFound("a/b.ts".into()).into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let empty: AppError = StorageError::EmptyObject.into();
        assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);

        let down: AppError = StorageError::Unavailable("connection refused".into()).into();
        assert_eq!(down.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn duplicate_job_maps_to_conflict() {
        let err: AppError = JobStoreError::Duplicate("dup1".into()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("dup1"));
    }
}
