//! Input guardrail types and traits.
//!
//! Input guardrails validate the user message before it reaches the model,
//! enabling early rejection (or rewriting) of off-topic, unsafe or
//! malformed requests without incurring a model call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::{GuardrailFailure, InvocationContext};
use crate::error::Result;
use crate::message::Message;

/// What an input guardrail decided.
#[derive(Debug, Clone)]
pub enum InputGuardrailResult {
    /// The message is acceptable as is.
    Success,
    /// The message is acceptable once replaced by this text.
    SuccessWith(String),
    /// The message is rejected.
    Failure(GuardrailFailure),
    /// The message is rejected and nothing else may be attempted.
    Fatal(GuardrailFailure),
}

impl InputGuardrailResult {
    /// Accept the message.
    #[must_use]
    pub const fn success() -> Self {
        Self::Success
    }

    /// Accept the message, replacing its text.
    #[must_use]
    pub fn success_with(text: impl Into<String>) -> Self {
        Self::SuccessWith(text.into())
    }

    /// Reject the message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(GuardrailFailure::new(message))
    }

    /// Reject the message, attaching the underlying cause.
    #[must_use]
    pub fn failure_with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failure(GuardrailFailure::with_cause(message, cause))
    }

    /// Reject the message fatally.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(GuardrailFailure::new(message))
    }

    /// Reject the message fatally, attaching the underlying cause.
    #[must_use]
    pub fn fatal_with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fatal(GuardrailFailure::with_cause(message, cause))
    }

    /// Returns `true` for `Success` and `SuccessWith`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::SuccessWith(_))
    }
}

/// What an input guardrail gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct InputGuardrailRequest<'a> {
    /// The user message, including rewrites by earlier guardrails.
    pub user_message: &'a Message,
    /// Conversation memory before this message, oldest first.
    pub memory: &'a [Message],
    /// The invocation being validated.
    pub context: &'a InvocationContext,
}

impl InputGuardrailRequest<'_> {
    /// Returns the user message text.
    #[must_use]
    pub fn text(&self) -> &str {
        self.user_message.text()
    }
}

/// Trait for implementing input guardrail validation logic.
///
/// Returning `Err` is treated as a fatal failure with the error as cause;
/// it is never retried.
#[async_trait]
pub trait InputGuardrailCheck: Send + Sync {
    /// Validate the user message.
    async fn validate(&self, request: &InputGuardrailRequest<'_>) -> Result<InputGuardrailResult>;
}

/// A named, shareable input guardrail.
///
/// Cloning shares the underlying check.
#[derive(Clone)]
pub struct InputGuardrail {
    name: String,
    check: Arc<dyn InputGuardrailCheck>,
}

impl InputGuardrail {
    /// Create an input guardrail owning its check.
    #[must_use]
    pub fn new(name: impl Into<String>, check: impl InputGuardrailCheck + 'static) -> Self {
        Self::shared(name, Arc::new(check))
    }

    /// Create an input guardrail from a check that is also held elsewhere.
    #[must_use]
    pub fn shared(name: impl Into<String>, check: Arc<dyn InputGuardrailCheck>) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }

    /// Create an input guardrail from a synchronous closure.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&InputGuardrailRequest<'_>) -> InputGuardrailResult + Send + Sync + 'static,
    {
        Self::new(name, FnCheck(f))
    }

    /// Returns the name of this guardrail.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the check.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by the check itself.
    pub async fn validate(
        &self,
        request: &InputGuardrailRequest<'_>,
    ) -> Result<InputGuardrailResult> {
        self.check.validate(request).await
    }
}

impl fmt::Debug for InputGuardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputGuardrail")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct FnCheck<F>(F);

#[async_trait]
impl<F> InputGuardrailCheck for FnCheck<F>
where
    F: Fn(&InputGuardrailRequest<'_>) -> InputGuardrailResult + Send + Sync,
{
    async fn validate(&self, request: &InputGuardrailRequest<'_>) -> Result<InputGuardrailResult> {
        Ok((self.0)(request))
    }
}
