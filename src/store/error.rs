//! Store Errors
//!
//! Error types for persistence operations.

use uuid::Uuid;

/// Errors that can occur in a repository
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the row changed since it was read
    #[error("Concurrent modification of {entity} {id}")]
    VersionConflict { entity: &'static str, id: Uuid },

    /// Row expected to exist is missing
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Unique constraint hit (e.g. interest already posted for a period)
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Stored data failed domain validation on load
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }

    /// Whether the user may simply resubmit
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::Database(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conflict_is_retryable() {
        let err = StoreError::VersionConflict {
            entity: "loan",
            id: Uuid::nil(),
        };
        assert!(err.is_version_conflict());
        assert!(err.is_retryable());
        assert!(!StoreError::Duplicate("x".into()).is_retryable());
    }
}
