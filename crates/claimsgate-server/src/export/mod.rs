//! Bulk export pipeline
//!
//! Kick-off and `$everything` requests become jobs through the
//! [`orchestrator`]; batch workers fill the [`writer`] output; the status
//! endpoint projects batches into a [`status::JobState`] and renders a
//! [`manifest::Manifest`]; synchronous callers get the files inlined by the
//! [`assembler`].

pub mod assembler;
pub mod everything;
pub mod files;
pub mod kickoff;
pub mod manifest;
pub mod orchestrator;
pub mod status;
pub mod writer;

use claimsgate_api::ApiError;
use claimsgate_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

pub use assembler::{Assembled, assemble_direct};
pub use files::FileStore;
pub use manifest::Manifest;
pub use orchestrator::{ExportSubmission, JobOrchestrator};
pub use status::{JobState, Progress, aggregate};
pub use writer::{NdjsonWriter, NdjsonWriterError};

/// Errors surfaced by the export controllers
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("upstream claims source error: {0}")]
    Upstream(String),

    #[error("failed to retrieve data: job {0} did not finish in time")]
    Timeout(Uuid),

    #[error("job {0} failed")]
    Failed(Uuid),

    #[error("results of job {0} are no longer available")]
    Stale(Uuid),

    #[error("failed to assemble output: {0}")]
    Assembly(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Validation(msg) => ApiError::bad_request(msg),
            ExportError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            ExportError::Stale(_) => ApiError::gone(err.to_string()),
            ExportError::Storage(ref e) if e.is_not_found() => ApiError::not_found(e.to_string()),
            ExportError::Timeout(_) => ApiError::internal("failed to retrieve data"),
            other => ApiError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn export_errors_map_to_http_status() {
        let id = Uuid::new_v4();
        let cases = [
            (ExportError::validation("bad"), StatusCode::BAD_REQUEST),
            (ExportError::NotFound("Group/g1".into()), StatusCode::NOT_FOUND),
            (ExportError::Stale(id), StatusCode::GONE),
            (ExportError::Timeout(id), StatusCode::INTERNAL_SERVER_ERROR),
            (ExportError::Failed(id), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ExportError::Assembly("broken line".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ExportError::Storage(StorageError::not_found("file", "x")),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn timeout_message_is_generic() {
        let api = ApiError::from(ExportError::Timeout(Uuid::nil()));
        assert_eq!(api.to_operation_outcome().issue[0]["diagnostics"], "failed to retrieve data");
    }
}
