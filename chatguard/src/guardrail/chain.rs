//! Guardrail chains: ordered, sequential execution of one kind of guardrail.
//!
//! A chain runs its members in declaration order and never concurrently.
//! Each member sees the output of the previous one (rewrite propagation),
//! and the first non-success result stops the chain. Chains report their
//! decision as a value ([`InputChainOutcome`], [`OutputChainOutcome`]);
//! turning a failure into an [`Error`](crate::Error) is left to the caller.

use serde_json::Value;
use tracing::{debug, warn};

use super::{
    GuardrailFailure, InputGuardrail, InputGuardrailRequest, InputGuardrailResult,
    InvocationContext, OutputGuardrail, OutputGuardrailRequest, OutputGuardrailResult,
};
use crate::chat::{ChatRequest, ChatResponse};
use crate::error::{
    GuardrailError, GuardrailErrorReason, GuardrailKind, RETRY_AFTER_REWRITE_MESSAGE,
};
use crate::message::Message;
use crate::telemetry::InvocationMetrics;

/// The guardrail that stopped a chain, and why.
#[derive(Debug, Clone)]
pub struct ChainFailure {
    /// Name of the guardrail.
    pub guardrail: String,
    /// What it reported.
    pub failure: GuardrailFailure,
    /// Why the chain stopped.
    pub reason: GuardrailErrorReason,
}

impl ChainFailure {
    fn new(guardrail: &str, failure: GuardrailFailure, reason: GuardrailErrorReason) -> Self {
        Self {
            guardrail: guardrail.to_owned(),
            failure,
            reason,
        }
    }

    /// Convert into the error surfaced to the caller.
    #[must_use]
    pub fn into_error(self, kind: GuardrailKind) -> GuardrailError {
        GuardrailError::new(kind, self.guardrail, self.failure.message, self.reason)
            .with_cause(self.failure.cause)
    }
}

/// Result of running an input chain.
#[derive(Debug, Clone)]
pub enum InputChainOutcome {
    /// Every guardrail accepted the message.
    Passed {
        /// The message to send, including rewrites.
        message: Message,
        /// Whether any guardrail rewrote the message.
        rewritten: bool,
    },
    /// A guardrail rejected the message.
    Failed(ChainFailure),
}

/// An ordered list of input guardrails.
#[derive(Debug, Clone, Default)]
pub struct InputGuardrailChain {
    guardrails: Vec<InputGuardrail>,
}

impl InputGuardrailChain {
    /// Create a chain; `guardrails` order is execution order.
    #[must_use]
    pub const fn new(guardrails: Vec<InputGuardrail>) -> Self {
        Self { guardrails }
    }

    /// Append a guardrail at the end of the chain.
    pub fn push(&mut self, guardrail: InputGuardrail) {
        self.guardrails.push(guardrail);
    }

    /// Number of guardrails.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guardrails.len()
    }

    /// Whether the chain has no guardrail.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guardrails.is_empty()
    }

    /// Guardrail names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.guardrails.iter().map(InputGuardrail::name).collect()
    }

    /// Validate a user message.
    ///
    /// `memory` is the conversation before the message. Stops at the first
    /// failure, fatal result or error; later guardrails are not invoked.
    pub async fn validate(
        &self,
        user_message: Message,
        memory: &[Message],
        context: &InvocationContext,
        metrics: &mut InvocationMetrics,
    ) -> InputChainOutcome {
        let mut current = user_message;
        let mut rewritten = false;

        for guardrail in &self.guardrails {
            let name = guardrail.name();
            metrics.record_input_guardrail();
            let request = InputGuardrailRequest {
                user_message: &current,
                memory,
                context,
            };
            let result = guardrail.validate(&request).await;
            debug!(guardrail = name, "input guardrail executed");

            let (failure, reason) = match result {
                Ok(InputGuardrailResult::Success) => continue,
                Ok(InputGuardrailResult::SuccessWith(text)) => {
                    current = Message::new(current.role, text);
                    rewritten = true;
                    metrics.record_rewrite();
                    continue;
                }
                Ok(InputGuardrailResult::Failure(failure)) => {
                    (failure, GuardrailErrorReason::Failure)
                }
                Ok(InputGuardrailResult::Fatal(failure)) => (failure, GuardrailErrorReason::Fatal),
                Err(err) => (GuardrailFailure::from_error(err), GuardrailErrorReason::Error),
            };

            warn!(guardrail = name, message = %failure.message, "input guardrail rejected message");
            return InputChainOutcome::Failed(ChainFailure::new(name, failure, reason));
        }

        InputChainOutcome::Passed {
            message: current,
            rewritten,
        }
    }
}

/// Result of one pass of an output chain.
#[derive(Debug, Clone)]
pub enum OutputChainOutcome {
    /// Every guardrail accepted the response.
    Passed {
        /// The response, with its text replaced by the last rewrite if any.
        response: ChatResponse,
        /// Structured value of the last rewrite, if it carried one.
        value: Option<Value>,
        /// Whether any guardrail rewrote the response.
        rewritten: bool,
    },
    /// A guardrail asked for the identical request to be sent again.
    Retry {
        /// Name of the guardrail.
        guardrail: String,
        /// Why the response was rejected.
        failure: GuardrailFailure,
    },
    /// A guardrail asked for a corrective message before calling again.
    Reprompt {
        /// Name of the guardrail.
        guardrail: String,
        /// Why the response was rejected.
        failure: GuardrailFailure,
        /// Corrective instruction.
        prompt: String,
    },
    /// A guardrail rejected the response for good.
    Failed(ChainFailure),
}

/// An ordered list of output guardrails.
#[derive(Debug, Clone, Default)]
pub struct OutputGuardrailChain {
    guardrails: Vec<OutputGuardrail>,
}

impl OutputGuardrailChain {
    /// Create a chain; `guardrails` order is execution order.
    #[must_use]
    pub const fn new(guardrails: Vec<OutputGuardrail>) -> Self {
        Self { guardrails }
    }

    /// Append a guardrail at the end of the chain.
    pub fn push(&mut self, guardrail: OutputGuardrail) {
        self.guardrails.push(guardrail);
    }

    /// Number of guardrails.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guardrails.len()
    }

    /// Whether the chain has no guardrail.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guardrails.is_empty()
    }

    /// Guardrail names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.guardrails.iter().map(OutputGuardrail::name).collect()
    }

    /// Run one validation pass over a model response.
    ///
    /// `memory` is the conversation ending with the response under
    /// validation. A retry or reprompt requested after a rewrite in the
    /// same pass is reported as a failure with
    /// [`RETRY_AFTER_REWRITE_MESSAGE`].
    pub async fn validate(
        &self,
        response: &ChatResponse,
        request: &ChatRequest,
        memory: &[Message],
        context: &InvocationContext,
        attempt: u32,
        metrics: &mut InvocationMetrics,
    ) -> OutputChainOutcome {
        let mut current = response.clone();
        let mut value = None;
        let mut rewritten = false;

        for guardrail in &self.guardrails {
            let name = guardrail.name();
            metrics.record_output_guardrail();
            let guardrail_request = OutputGuardrailRequest {
                response: &current,
                request,
                memory,
                context,
                attempt,
            };
            let result = guardrail.validate(&guardrail_request).await;
            debug!(guardrail = name, attempt, "output guardrail executed");

            match result {
                Ok(OutputGuardrailResult::Success) => {}
                Ok(OutputGuardrailResult::SuccessWith(rewrite)) => {
                    current = current.with_text(rewrite.text);
                    value = rewrite.value;
                    rewritten = true;
                    metrics.record_rewrite();
                }
                Ok(OutputGuardrailResult::Retry(_) | OutputGuardrailResult::Reprompt { .. })
                    if rewritten =>
                {
                    warn!(guardrail = name, "retry or reprompt requested after rewrite");
                    return OutputChainOutcome::Failed(ChainFailure::new(
                        name,
                        GuardrailFailure::new(RETRY_AFTER_REWRITE_MESSAGE),
                        GuardrailErrorReason::RetryAfterRewrite,
                    ));
                }
                Ok(OutputGuardrailResult::Retry(failure)) => {
                    return OutputChainOutcome::Retry {
                        guardrail: name.to_owned(),
                        failure,
                    };
                }
                Ok(OutputGuardrailResult::Reprompt { failure, prompt }) => {
                    return OutputChainOutcome::Reprompt {
                        guardrail: name.to_owned(),
                        failure,
                        prompt,
                    };
                }
                Ok(OutputGuardrailResult::Failure(failure)) => {
                    return OutputChainOutcome::Failed(ChainFailure::new(
                        name,
                        failure,
                        GuardrailErrorReason::Failure,
                    ));
                }
                Ok(OutputGuardrailResult::Fatal(failure)) => {
                    return OutputChainOutcome::Failed(ChainFailure::new(
                        name,
                        failure,
                        GuardrailErrorReason::Fatal,
                    ));
                }
                Err(err) => {
                    return OutputChainOutcome::Failed(ChainFailure::new(
                        name,
                        GuardrailFailure::from_error(err),
                        GuardrailErrorReason::Error,
                    ));
                }
            }
        }

        OutputChainOutcome::Passed {
            response: current,
            value,
            rewritten,
        }
    }
}
