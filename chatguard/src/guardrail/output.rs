//! Output guardrail types and traits.
//!
//! Output guardrails validate the model response after generation. Besides
//! accepting, rewriting and rejecting, they can ask the controller to call
//! the model again, either with the identical request ([`retry`]) or after
//! appending a corrective user message ([`reprompt`]).
//!
//! [`retry`]: OutputGuardrailResult::retry
//! [`reprompt`]: OutputGuardrailResult::reprompt

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{GuardrailFailure, InvocationContext};
use crate::chat::{ChatRequest, ChatResponse};
use crate::error::Result;
use crate::message::Message;

/// A replacement for the model output produced by a guardrail.
#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    /// Replacement text, seen by later guardrails and stored in memory.
    pub text: String,
    /// Optional structured value delivered to the caller instead of the text.
    pub value: Option<Value>,
}

/// What an output guardrail decided.
#[derive(Debug, Clone)]
pub enum OutputGuardrailResult {
    /// The response is acceptable as is.
    Success,
    /// The response is acceptable once replaced by the rewrite.
    SuccessWith(Rewrite),
    /// The response is rejected.
    Failure(GuardrailFailure),
    /// The response is rejected and nothing else may be attempted.
    Fatal(GuardrailFailure),
    /// Call the model again with the identical request.
    Retry(GuardrailFailure),
    /// Append `prompt` as a user message, then call the model again.
    Reprompt {
        /// Why the response was rejected.
        failure: GuardrailFailure,
        /// Corrective instruction sent to the model.
        prompt: String,
    },
}

impl OutputGuardrailResult {
    /// Accept the response.
    #[must_use]
    pub const fn success() -> Self {
        Self::Success
    }

    /// Accept the response, replacing its text.
    #[must_use]
    pub fn success_with(text: impl Into<String>) -> Self {
        Self::SuccessWith(Rewrite {
            text: text.into(),
            value: None,
        })
    }

    /// Accept the response, replacing its text and attaching a structured value.
    #[must_use]
    pub fn success_with_value(text: impl Into<String>, value: Value) -> Self {
        Self::SuccessWith(Rewrite {
            text: text.into(),
            value: Some(value),
        })
    }

    /// Reject the response.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(GuardrailFailure::new(message))
    }

    /// Reject the response, attaching the underlying cause.
    #[must_use]
    pub fn failure_with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failure(GuardrailFailure::with_cause(message, cause))
    }

    /// Reject the response fatally.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(GuardrailFailure::new(message))
    }

    /// Reject the response fatally, attaching the underlying cause.
    #[must_use]
    pub fn fatal_with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fatal(GuardrailFailure::with_cause(message, cause))
    }

    /// Ask for the model to be called again with the same request.
    #[must_use]
    pub fn retry(message: impl Into<String>) -> Self {
        Self::Retry(GuardrailFailure::new(message))
    }

    /// Ask for the model to be called again after a corrective user message.
    #[must_use]
    pub fn reprompt(message: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::Reprompt {
            failure: GuardrailFailure::new(message),
            prompt: prompt.into(),
        }
    }

    /// Returns `true` for `Success` and `SuccessWith`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::SuccessWith(_))
    }

    /// Returns `true` for `Retry` and `Reprompt`.
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        matches!(self, Self::Retry(_) | Self::Reprompt { .. })
    }
}

/// What an output guardrail gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct OutputGuardrailRequest<'a> {
    /// The model response, including rewrites by earlier guardrails.
    pub response: &'a ChatResponse,
    /// The request that produced the response.
    pub request: &'a ChatRequest,
    /// Conversation as it stands, ending with the response under validation.
    pub memory: &'a [Message],
    /// The invocation being validated.
    pub context: &'a InvocationContext,
    /// 1 for the first model call, incremented on every retry or reprompt.
    pub attempt: u32,
}

impl OutputGuardrailRequest<'_> {
    /// Returns the response text.
    #[must_use]
    pub fn text(&self) -> &str {
        self.response.text()
    }

    /// Returns the assistant message preceding the one under validation, if any.
    #[must_use]
    pub fn previous_response(&self) -> Option<&Message> {
        self.memory
            .iter()
            .rev()
            .filter(|m| m.role == crate::message::Role::Assistant)
            .nth(1)
    }
}

/// Trait for implementing output guardrail validation logic.
///
/// Returning `Err` is treated as a fatal failure with the error as cause;
/// it is never retried.
#[async_trait]
pub trait OutputGuardrailCheck: Send + Sync {
    /// Validate the model response.
    async fn validate(&self, request: &OutputGuardrailRequest<'_>)
    -> Result<OutputGuardrailResult>;
}

/// A named, shareable output guardrail.
///
/// Cloning shares the underlying check.
#[derive(Clone)]
pub struct OutputGuardrail {
    name: String,
    check: Arc<dyn OutputGuardrailCheck>,
}

impl OutputGuardrail {
    /// Create an output guardrail owning its check.
    #[must_use]
    pub fn new(name: impl Into<String>, check: impl OutputGuardrailCheck + 'static) -> Self {
        Self::shared(name, Arc::new(check))
    }

    /// Create an output guardrail from a check that is also held elsewhere.
    #[must_use]
    pub fn shared(name: impl Into<String>, check: Arc<dyn OutputGuardrailCheck>) -> Self {
        Self {
            name: name.into(),
            check,
        }
    }

    /// Create an output guardrail from a synchronous closure.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&OutputGuardrailRequest<'_>) -> OutputGuardrailResult + Send + Sync + 'static,
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
        request: &OutputGuardrailRequest<'_>,
    ) -> Result<OutputGuardrailResult> {
        self.check.validate(request).await
    }
}

impl fmt::Debug for OutputGuardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputGuardrail")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct FnCheck<F>(F);

#[async_trait]
impl<F> OutputGuardrailCheck for FnCheck<F>
where
    F: Fn(&OutputGuardrailRequest<'_>) -> OutputGuardrailResult + Send + Sync,
{
    async fn validate(
        &self,
        request: &OutputGuardrailRequest<'_>,
    ) -> Result<OutputGuardrailResult> {
        Ok((self.0)(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_factories() {
        assert!(OutputGuardrailResult::success().is_success());
        assert!(OutputGuardrailResult::retry("again").is_retry());
        assert!(OutputGuardrailResult::reprompt("bad", "fix it").is_retry());
        assert!(!OutputGuardrailResult::fatal("no").is_retry());

        let OutputGuardrailResult::SuccessWith(rewrite) =
            OutputGuardrailResult::success_with_value("{}", serde_json::json!({}))
        else {
            panic!("expected rewrite");
        };
        assert_eq!(rewrite.text, "{}");
        assert_eq!(rewrite.value, Some(serde_json::json!({})));
    }

    #[test]
    fn test_previous_response() {
        let memory = vec![
            Message::user("q"),
            Message::assistant("Nope"),
            Message::user("try again"),
            Message::assistant("Yes"),
        ];
        let response = ChatResponse::new("Yes");
        let request = ChatRequest::default();
        let context = InvocationContext::new("chat");
        let req = OutputGuardrailRequest {
            response: &response,
            request: &request,
            memory: &memory,
            context: &context,
            attempt: 2,
        };
        assert_eq!(req.previous_response().map(Message::text), Some("Nope"));
    }
}
