//! Errors raised by conversation memories and memory providers.

/// Why a memory operation failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MemoryError {
    /// A stored conversation could not be encoded or decoded.
    #[error("conversation (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The memory id cannot name a conversation.
    #[error("invalid memory id {0:?}")]
    InvalidId(String),

    /// An external store rejected the operation.
    #[error("memory '{memory_id}' unavailable: {message}")]
    Unavailable {
        /// Conversation the operation targeted.
        memory_id: String,
        /// What the store reported.
        message: String,
    },
}

impl MemoryError {
    /// Report a failing store for `memory_id`.
    #[must_use]
    pub fn unavailable(memory_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            memory_id: memory_id.into(),
            message: message.into(),
        }
    }
}

/// Result of a memory operation that can only fail with a [`MemoryError`].
pub type MemoryResult<T> = Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_conversation() {
        let err = MemoryError::unavailable("user-7", "connection reset");
        assert_eq!(err.to_string(), "memory 'user-7' unavailable: connection reset");
        assert_eq!(
            MemoryError::InvalidId("  ".into()).to_string(),
            "invalid memory id \"  \""
        );
    }
}
