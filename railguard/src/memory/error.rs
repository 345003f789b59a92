//! Error types for the conversation history collaborator.
//!
//! [`MemoryError`] covers history operation failure modes and integrates
//! into the global [`Error`](crate::Error) hierarchy via `Error::Memory`.

/// Error type for conversation history operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MemoryError {
    /// The storage backend encountered an error.
    #[error("[{backend}] {message}")]
    Storage {
        /// Backend identifier (e.g., `"redis"`).
        backend: &'static str,
        /// Human-readable error description.
        message: String,
    },

    /// Failed to acquire a lock (e.g., `Mutex` poisoned by a panic).
    #[error("lock error: {0}")]
    Lock(String),
}

impl MemoryError {
    /// Creates a [`Storage`](Self::Storage) error for the given backend.
    #[must_use]
    pub fn storage(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            backend,
            message: message.into(),
        }
    }

    /// Returns `true` if this is a transient error that may succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Lock(_))
    }
}

/// Convenience alias for memory-scoped results.
pub type MemoryResult<T> = Result<T, MemoryError>;
