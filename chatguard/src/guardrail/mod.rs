//! Guardrail module: validation of AI-service inputs and outputs.
//!
//! Guardrails are validation units that run around a chat model call:
//!
//! - **[`InputGuardrail`]** validates (and may rewrite) the user message
//!   before it reaches the model.
//! - **[`OutputGuardrail`]** validates (and may rewrite) the model response,
//!   and may ask for a **retry** (same request again) or a **reprompt**
//!   (append a corrective user message, then call the model again).
//!
//! Guardrails of one kind form a chain ([`InputGuardrailChain`],
//! [`OutputGuardrailChain`]) executed strictly in declaration order. Each
//! member sees the output of the previous one, and the first non-success
//! result stops the chain.
//!
//! # Shared instances
//!
//! A guardrail handle wraps its check in an `Arc`; cloning the handle shares
//! the instance. The same instance therefore serves every method it is
//! attached to and every concurrent invocation, so any state a check keeps
//! (counters, captured values) must use atomics or locks.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use chatguard::prelude::*;
//!
//! struct NoShouting;
//!
//! #[async_trait::async_trait]
//! impl OutputGuardrailCheck for NoShouting {
//!     async fn validate(&self, request: &OutputGuardrailRequest<'_>) -> Result<OutputGuardrailResult> {
//!         if request.text().chars().any(char::is_uppercase) {
//!             return Ok(OutputGuardrailResult::reprompt(
//!                 "response contains uppercase letters",
//!                 "Answer again using only lowercase letters.",
//!             ));
//!         }
//!         Ok(OutputGuardrailResult::success())
//!     }
//! }
//!
//! let service = AiService::builder()
//!     .chat_model(model)
//!     .output_guardrail(OutputGuardrail::new("no-shouting", NoShouting))
//!     .build()?;
//! ```

mod builtin;
mod chain;
mod context;
mod input;
mod output;

pub use builtin::{
    BlockedPatternsInputGuardrail, DEFAULT_JSON_REPROMPT, JsonExtractorOutputGuardrail,
    MaxLengthInputGuardrail,
};
pub use chain::{ChainFailure, InputChainOutcome, InputGuardrailChain, OutputChainOutcome, OutputGuardrailChain};
pub use context::InvocationContext;
pub use input::{InputGuardrail, InputGuardrailCheck, InputGuardrailRequest, InputGuardrailResult};
pub use output::{
    OutputGuardrail, OutputGuardrailCheck, OutputGuardrailRequest, OutputGuardrailResult, Rewrite,
};

use std::sync::Arc;

use crate::error::BoxedCause;

/// A validation message reported by a guardrail, with an optional cause.
#[derive(Debug, Clone)]
pub struct GuardrailFailure {
    /// Human-readable explanation.
    pub message: String,
    /// Underlying error, if any.
    pub cause: Option<BoxedCause>,
}

impl GuardrailFailure {
    /// Create a failure with a message and no cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a failure with a message and an underlying cause.
    #[must_use]
    pub fn with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    /// Wrap an error returned by a guardrail's validation logic.
    ///
    /// The error's text becomes the message and the error itself the cause.
    #[must_use]
    pub fn from_error(err: crate::error::Error) -> Self {
        Self {
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }
}
