use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures surfaced by a conversation store.
///
/// "Not found" is deliberately absent: unknown conversations read as empty
/// and deleting one reports `false`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Disk or network failure, including timeouts
    #[error("Storage unavailable: {context}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Another conversation already owns the key
    #[error("Conversation key conflict: '{key}' is already taken")]
    Conflict { key: String },

    /// Persisted content could not be parsed
    #[error("Corrupted data at {location}: {reason}")]
    DataCorruption { location: String, reason: String },

    #[error("Invalid conversation key: {0}")]
    InvalidKey(String),

    /// A message could not be serialized for storage
    #[error("Failed to encode conversation: {0}")]
    Encoding(String),
}

impl StoreError {
    pub fn unavailable<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::StorageUnavailable {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn corruption(location: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::DataCorruption {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
