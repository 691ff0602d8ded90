//! Error types for chat model invocation.
//!
//! [`ModelError`] is what model implementations report; it integrates into
//! the global [`Error`](crate::Error) hierarchy via `Error::Model`.

/// Error type for chat model invocation.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ModelError {
    /// The request could not be completed.
    #[error("request failed: {0}")]
    Request(String),

    /// The response stream reported an error.
    #[error("stream error: {0}")]
    Stream(String),

    /// The model produced neither text nor a complete response.
    #[error("model returned an empty response")]
    EmptyResponse,

    /// No model of the required kind is configured.
    #[error("no {0} model configured")]
    NotConfigured(&'static str),
}

impl ModelError {
    /// Create a request error.
    #[must_use]
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    /// Create a stream error.
    #[must_use]
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }
}
