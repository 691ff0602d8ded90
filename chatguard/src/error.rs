//! Unified error types for chatguard.
//!
//! This module provides the error hierarchy covering:
//! - Guardrail failures surfaced to the caller (input and output side)
//! - Chat model invocation errors
//! - Chat memory errors
//! - Configuration errors detected while building a service

use std::fmt;
use std::sync::Arc;

pub use crate::chat::ModelError;
pub use crate::memory::MemoryError;

/// Result type alias for chatguard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A shared, type-erased error used as the underlying cause of a guardrail failure.
pub type BoxedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for chatguard.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An input guardrail rejected the user message.
    #[error(transparent)]
    InputGuardrail(GuardrailError),

    /// An output guardrail rejected the model response, or the retry budget ran out.
    #[error(transparent)]
    OutputGuardrail(GuardrailError),

    /// Chat model invocation error.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Chat memory error.
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    /// Invalid service configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error with a message.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns the guardrail error if this is an input or output guardrail failure.
    #[must_use]
    pub const fn guardrail(&self) -> Option<&GuardrailError> {
        match self {
            Self::InputGuardrail(err) | Self::OutputGuardrail(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` if an input guardrail rejected the invocation.
    #[must_use]
    pub const fn is_input_guardrail(&self) -> bool {
        matches!(self, Self::InputGuardrail(_))
    }

    /// Returns `true` if an output guardrail rejected the invocation.
    #[must_use]
    pub const fn is_output_guardrail(&self) -> bool {
        matches!(self, Self::OutputGuardrail(_))
    }
}

impl From<GuardrailError> for Error {
    fn from(err: GuardrailError) -> Self {
        match err.kind {
            GuardrailKind::Input => Self::InputGuardrail(err),
            GuardrailKind::Output => Self::OutputGuardrail(err),
        }
    }
}

/// Which side of the invocation a guardrail validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardrailKind {
    /// Validates the outbound user message.
    Input,
    /// Validates the model response.
    Output,
}

impl fmt::Display for GuardrailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("Input"),
            Self::Output => f.write_str("Output"),
        }
    }
}

/// Why a guardrail chain ended the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum GuardrailErrorReason {
    /// The guardrail returned a failure result.
    Failure,
    /// The guardrail returned a fatal result.
    Fatal,
    /// The guardrail's validation logic itself returned an error.
    Error,
    /// Retries and reprompts used up the configured budget.
    RetriesExhausted {
        /// The configured maximum number of retries.
        max_retries: u32,
    },
    /// A retry or reprompt was requested after an earlier guardrail rewrote the output.
    RetryAfterRewrite,
}

/// Message used when a guardrail asks for a retry or reprompt after a rewrite.
pub const RETRY_AFTER_REWRITE_MESSAGE: &str =
    "Retry or reprompt is not allowed after a rewritten output";

/// A guardrail failure that crossed the invocation boundary.
///
/// Carries the name of the guardrail that stopped the chain, its validation
/// message and, when present, the underlying cause (reachable through
/// [`std::error::Error::source`]).
#[derive(Debug, Clone)]
pub struct GuardrailError {
    /// Input or output side.
    pub kind: GuardrailKind,
    /// Name of the guardrail that stopped the chain.
    pub guardrail: String,
    /// Validation message reported by the guardrail.
    pub message: String,
    /// Why the chain stopped.
    pub reason: GuardrailErrorReason,
    /// Underlying cause, if any.
    pub cause: Option<BoxedCause>,
}

impl GuardrailError {
    /// Create a guardrail error.
    #[must_use]
    pub fn new(
        kind: GuardrailKind,
        guardrail: impl Into<String>,
        message: impl Into<String>,
        reason: GuardrailErrorReason,
    ) -> Self {
        Self {
            kind,
            guardrail: guardrail.into(),
            message: message.into(),
            reason,
            cause: None,
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: Option<BoxedCause>) -> Self {
        self.cause = cause;
        self
    }

    /// Returns `true` if the retry budget was exhausted.
    #[must_use]
    pub const fn is_retries_exhausted(&self) -> bool {
        matches!(self.reason, GuardrailErrorReason::RetriesExhausted { .. })
    }
}

impl fmt::Display for GuardrailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            GuardrailErrorReason::RetriesExhausted { max_retries } => write!(
                f,
                "{} guardrail '{}' reached the maximum number of retries ({max_retries}): {}",
                self.kind, self.guardrail, self.message
            )?,
            _ => write!(
                f,
                "{} guardrail '{}' failed: {}",
                self.kind, self.guardrail, self.message
            )?,
        }
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for GuardrailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let cause: &(dyn std::error::Error + 'static) = self.cause.as_deref()?;
        Some(cause)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_guardrail_error_routes_by_kind() {
        let input = GuardrailError::new(
            GuardrailKind::Input,
            "len",
            "too long",
            GuardrailErrorReason::Failure,
        );
        assert!(Error::from(input).is_input_guardrail());
        let output = GuardrailError::new(
            GuardrailKind::Output,
            "json",
            "not json",
            GuardrailErrorReason::Fatal,
        );
        assert!(Error::from(output).is_output_guardrail());
    }

    #[test]
    fn test_guardrail_error_display() {
        let err = GuardrailError::new(
            GuardrailKind::Input,
            "profanity",
            "bad word",
            GuardrailErrorReason::Failure,
        );
        assert_eq!(err.to_string(), "Input guardrail 'profanity' failed: bad word");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_guardrail_error_with_cause() {
        let cause: BoxedCause = Arc::new(std::io::Error::other("disk on fire"));
        let err = Error::OutputGuardrail(
            GuardrailError::new(
                GuardrailKind::Output,
                "json",
                "boom",
                GuardrailErrorReason::Error,
            )
            .with_cause(Some(cause)),
        );

        assert!(err.is_output_guardrail());
        assert!(err.to_string().contains("caused by: disk on fire"));
        let inner = err.guardrail().expect("guardrail error");
        assert_eq!(
            inner.source().map(ToString::to_string).as_deref(),
            Some("disk on fire")
        );
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = GuardrailError::new(
            GuardrailKind::Output,
            "always-retry",
            "try again",
            GuardrailErrorReason::RetriesExhausted { max_retries: 3 },
        );
        assert!(err.is_retries_exhausted());
        assert!(err.to_string().contains("maximum number of retries (3)"));
    }
}
