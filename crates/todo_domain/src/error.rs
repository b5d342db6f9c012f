use thiserror::Error;

use crate::todo::TodoId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TodoError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("todo not found: {0}")]
    NotFound(TodoId),

    #[error("field `{0}` cannot be changed after creation")]
    ImmutableField(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("storage quota exceeded writing `{key}` (limit {limit} bytes)")]
    PersistenceQuotaExceeded { key: String, limit: usize },

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl TodoError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// Persistence failures leave in-memory state untouched and can be retried.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::PersistenceUnavailable(_) | Self::PersistenceQuotaExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TodoError>;
