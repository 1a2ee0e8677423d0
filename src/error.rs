//! Error types for the unified memory store

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, UnimemError>;

/// Main error type for the store
#[derive(Error, Debug)]
pub enum UnimemError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An invariant on tier, scope, project_id or content was violated
    #[error("{0}")]
    Validation(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    /// The store was closed or its database cannot be reached
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Legacy import aborted before any record was written
    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UnimemError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, UnimemError::Validation(_))
    }

    /// Get error code for the tool protocol layer
    pub fn code(&self) -> i64 {
        match self {
            UnimemError::Validation(_) => -32602,
            UnimemError::NotFound(_) => -32001,
            UnimemError::StorageUnavailable(_) => -32002,
            UnimemError::Cancelled => -32003,
            _ => -32000,
        }
    }

    /// Structured failure for callers that must not surface a raw fault
    pub fn to_failure(&self) -> FailureResponse {
        FailureResponse {
            success: false,
            error: self.to_string(),
            code: self.code(),
        }
    }
}

/// Failure payload handed back to the registration layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureResponse {
    pub success: bool,
    pub error: String,
    pub code: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failure_response() {
        let err = UnimemError::validation("Project-scoped memories require a project_id");
        let failure = err.to_failure();
        assert!(!failure.success);
        assert_eq!(failure.code, -32602);
        assert_eq!(failure.error, "Project-scoped memories require a project_id");
    }

    #[test]
    fn test_storage_unavailable_code() {
        let err = UnimemError::StorageUnavailable("store is closed".to_string());
        assert_eq!(err.code(), -32002);
        assert!(!err.is_validation());
        assert!(err.to_string().contains("store is closed"));
    }
}
