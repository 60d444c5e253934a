//! Storage error types for the batch repository layer.

use std::fmt;

/// Errors that can occur during repository operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested batch or file was not found.
    #[error("Not found: {kind}/{id}")]
    NotFound {
        /// What was looked up (`batch`, `file`, ...).
        kind: String,
        /// The identifier that was not found.
        id: String,
    },

    /// A status transition that the batch lifecycle does not allow.
    #[error("Invalid status transition for batch {batch_id}: {from} -> {to}")]
    InvalidTransition {
        batch_id: String,
        from: String,
        to: String,
    },

    /// The batch data violates a model invariant.
    #[error("Invalid batch: {message}")]
    InvalidBatch { message: String },

    /// Failed to connect to the storage backend.
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StorageError {
    #[must_use]
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn invalid_transition(
        batch_id: impl fmt::Display,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            batch_id: batch_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_batch(message: impl Into<String>) -> Self {
        Self::InvalidBatch {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidTransition { .. } => ErrorCategory::Conflict,
            Self::InvalidBatch { .. } => ErrorCategory::Validation,
            Self::ConnectionError { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of storage errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Validation,
    Infrastructure,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::not_found("batch", "123");
        assert_eq!(err.to_string(), "Not found: batch/123");

        let err = StorageError::invalid_transition("b1", "COMPLETED", "RUNNING");
        assert_eq!(
            err.to_string(),
            "Invalid status transition for batch b1: COMPLETED -> RUNNING"
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            StorageError::not_found("batch", "1").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            StorageError::invalid_batch("bad").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            StorageError::invalid_transition("b", "a", "c").category(),
            ErrorCategory::Conflict
        );
    }
}
