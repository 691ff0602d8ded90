//! Retry/reprompt controller wrapping output guardrail validation.
//!
//! The controller drives an [`OutputGuardrailChain`] around a model call:
//!
//! 1. **Validating**: run the chain over the current response.
//! 2. On success the (possibly rewritten) response is **Succeeded**.
//! 3. On failure, fatal result or guardrail error the invocation is
//!    **Failed**.
//! 4. On retry (**Retrying**) the identical request is sent again.
//! 5. On reprompt (**Reprompting**) the corrective message is appended to
//!    the conversation, and the model is called with the extended
//!    conversation.
//!
//! Retries and reprompts share one budget, checked before each loop; with a
//! budget of `0` the first retry or reprompt is terminal. Every new pass
//! restarts from the first guardrail of the chain.
//!
//! Memory is written only here: the response is appended before validation
//! so guardrails see it as the current tail. It is popped again on retry,
//! replaced by the rewritten text on rewrite, and kept (followed by the
//! corrective message) on reprompt. When the invocation fails, everything
//! the controller appended is removed again.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::chat::{
    ChatModel, ChatRequest, ChatResponse, ResponseAccumulator, StreamChunk, StreamingChatModel,
};
use crate::error::{Error, GuardrailError, GuardrailErrorReason, GuardrailKind, Result};
use crate::guardrail::{GuardrailFailure, InvocationContext, OutputChainOutcome, OutputGuardrailChain};
use crate::memory::ChatMemory;
use crate::message::Message;
use crate::telemetry::InvocationMetrics;

/// States of the controller for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Running the chain over the current response.
    Validating,
    /// Sending the identical request again.
    Retrying,
    /// Sending the conversation extended by a corrective message.
    Reprompting,
    /// The chain accepted a response.
    Succeeded,
    /// The invocation ended with an error.
    Failed,
}

/// Calls the model on behalf of the controller.
///
/// Lets the synchronous and the streaming path share the validation loop.
#[async_trait]
pub trait ModelInvoker: Send {
    /// Produce a complete response for the request.
    async fn invoke(&mut self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// Invokes a [`ChatModel`].
#[derive(Clone, Copy)]
pub struct ChatModelInvoker<'a> {
    model: &'a dyn ChatModel,
}

impl<'a> ChatModelInvoker<'a> {
    /// Wrap a model.
    #[must_use]
    pub const fn new(model: &'a dyn ChatModel) -> Self {
        Self { model }
    }
}

impl std::fmt::Debug for ChatModelInvoker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModelInvoker").finish_non_exhaustive()
    }
}

#[async_trait]
impl ModelInvoker for ChatModelInvoker<'_> {
    async fn invoke(&mut self, request: &ChatRequest) -> Result<ChatResponse> {
        self.model.chat(request).await
    }
}

/// Invokes a [`StreamingChatModel`], buffering the chunks of each attempt.
///
/// Only the chunks of the most recent attempt are kept, so after the
/// controller accepts a response [`take_partials`](Self::take_partials)
/// returns exactly the chunks of the accepted attempt.
pub struct StreamingModelInvoker<'a> {
    model: &'a dyn StreamingChatModel,
    partials: Vec<String>,
}

impl<'a> StreamingModelInvoker<'a> {
    /// Wrap a streaming model.
    #[must_use]
    pub const fn new(model: &'a dyn StreamingChatModel) -> Self {
        Self {
            model,
            partials: Vec::new(),
        }
    }

    /// Take the buffered chunks of the last attempt.
    pub fn take_partials(&mut self) -> Vec<String> {
        std::mem::take(&mut self.partials)
    }
}

impl std::fmt::Debug for StreamingModelInvoker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingModelInvoker")
            .field("partials", &self.partials.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ModelInvoker for StreamingModelInvoker<'_> {
    async fn invoke(&mut self, request: &ChatRequest) -> Result<ChatResponse> {
        self.partials.clear();
        let mut stream = self.model.chat_stream(request).await?;
        let mut acc = ResponseAccumulator::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let StreamChunk::Partial(text) = &chunk {
                debug!(len = text.len(), "buffered partial response");
            }
            acc.push(chunk);
        }
        let (partials, response) = acc.finish()?;
        self.partials = partials;
        Ok(response)
    }
}

/// A response accepted by the output chain.
#[derive(Debug, Clone)]
pub struct Validated {
    /// The accepted response, text replaced by the last rewrite if any.
    pub response: ChatResponse,
    /// Structured value of the last rewrite, if any.
    pub value: Option<Value>,
    /// Whether a guardrail rewrote the response.
    pub rewritten: bool,
}

impl Validated {
    /// Final text delivered to the caller.
    #[must_use]
    pub fn text(&self) -> &str {
        self.response.text()
    }
}

/// Runs the output chain around model calls within a retry budget.
pub struct RetryController<'a> {
    chain: &'a OutputGuardrailChain,
    max_retries: u32,
    memory: Option<&'a dyn ChatMemory>,
    context: &'a InvocationContext,
}

impl<'a> RetryController<'a> {
    /// Create a controller for one invocation.
    #[must_use]
    pub const fn new(
        chain: &'a OutputGuardrailChain,
        max_retries: u32,
        memory: Option<&'a dyn ChatMemory>,
        context: &'a InvocationContext,
    ) -> Self {
        Self {
            chain,
            max_retries,
            memory,
            context,
        }
    }

    /// Validate `response` (produced by `request`), retrying or reprompting
    /// through `invoker` as the chain requests.
    ///
    /// On any error every message this call added to memory is removed
    /// again, so a failed invocation leaves only the user message behind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutputGuardrail`] when a guardrail fails, when a
    /// retry or reprompt follows a rewrite, or when the retry budget is
    /// exhausted; propagates model and memory errors.
    pub async fn execute(
        &self,
        request: ChatRequest,
        response: ChatResponse,
        invoker: &mut dyn ModelInvoker,
        metrics: &mut InvocationMetrics,
    ) -> Result<Validated> {
        let mut appended = 0;
        let result = self
            .run(request, response, invoker, metrics, &mut appended)
            .await;
        if result.is_err() {
            self.roll_back(appended).await;
        }
        result
    }

    async fn run(
        &self,
        mut request: ChatRequest,
        mut response: ChatResponse,
        invoker: &mut dyn ModelInvoker,
        metrics: &mut InvocationMetrics,
        appended: &mut usize,
    ) -> Result<Validated> {
        let mut granted: u32 = 0;

        loop {
            debug!(
                state = ?ControllerState::Validating,
                attempt = granted + 1,
                "validating response"
            );
            let memory_view = self.append_response(&request, &response, appended).await?;

            let outcome = self
                .chain
                .validate(
                    &response,
                    &request,
                    &memory_view,
                    self.context,
                    granted + 1,
                    metrics,
                )
                .await;

            match outcome {
                OutputChainOutcome::Passed {
                    response: accepted,
                    value,
                    rewritten,
                } => {
                    if rewritten {
                        self.replace_tail(Message::assistant(accepted.text())).await?;
                    }
                    debug!(
                        state = ?ControllerState::Succeeded,
                        rewritten,
                        "output guardrails passed"
                    );
                    return Ok(Validated {
                        response: accepted,
                        value,
                        rewritten,
                    });
                }
                OutputChainOutcome::Failed(failure) => {
                    warn!(
                        state = ?ControllerState::Failed,
                        guardrail = %failure.guardrail,
                        message = %failure.failure.message,
                        "output guardrail failed"
                    );
                    return Err(failure.into_error(GuardrailKind::Output).into());
                }
                OutputChainOutcome::Retry { guardrail, failure } => {
                    if granted >= self.max_retries {
                        return Err(self.exhausted(guardrail, failure));
                    }
                    granted += 1;
                    metrics.record_retry();
                    warn!(
                        state = ?ControllerState::Retrying,
                        %guardrail,
                        message = %failure.message,
                        retry = granted,
                        "retrying model call"
                    );

                    self.discard_response(appended).await?;
                }
                OutputChainOutcome::Reprompt {
                    guardrail,
                    failure,
                    prompt,
                } => {
                    if granted >= self.max_retries {
                        return Err(self.exhausted(guardrail, failure));
                    }
                    granted += 1;
                    metrics.record_reprompt();
                    warn!(
                        state = ?ControllerState::Reprompting,
                        %guardrail,
                        message = %failure.message,
                        retry = granted,
                        "reprompting model"
                    );

                    request = self
                        .reprompt_request(request, &response, prompt, appended)
                        .await?;
                }
            }

            response = invoker.invoke(&request).await?;
            metrics.record_usage(response.usage);
        }
    }

    /// Append the response to memory and return the conversation guardrails see.
    async fn append_response(
        &self,
        request: &ChatRequest,
        response: &ChatResponse,
        appended: &mut usize,
    ) -> Result<Vec<Message>> {
        if let Some(memory) = self.memory {
            memory.add(response.message.clone()).await?;
            *appended += 1;
            return memory.messages().await;
        }
        let mut view = request.messages.clone();
        view.push(response.message.clone());
        Ok(view)
    }

    async fn discard_response(&self, appended: &mut usize) -> Result<()> {
        if let Some(memory) = self.memory {
            memory.pop().await?;
            *appended -= 1;
        }
        Ok(())
    }

    async fn replace_tail(&self, message: Message) -> Result<()> {
        if let Some(memory) = self.memory {
            memory.pop().await?;
            memory.add(message).await?;
        }
        Ok(())
    }

    /// Remove the `appended` most recent messages after a failed invocation.
    async fn roll_back(&self, appended: usize) {
        let Some(memory) = self.memory else {
            return;
        };
        for _ in 0..appended {
            if let Err(err) = memory.pop().await {
                warn!(memory_id = memory.id(), error = %err, "failed to roll back chat memory");
                return;
            }
        }
        if appended > 0 {
            debug!(memory_id = memory.id(), removed = appended, "rolled back chat memory");
        }
    }

    /// Build the request for the next attempt after a reprompt.
    ///
    /// The rejected response stays in the conversation ahead of the
    /// corrective message.
    async fn reprompt_request(
        &self,
        request: ChatRequest,
        rejected: &ChatResponse,
        prompt: String,
        appended: &mut usize,
    ) -> Result<ChatRequest> {
        if let Some(memory) = self.memory {
            memory.add(Message::user(prompt)).await?;
            *appended += 1;
            return Ok(ChatRequest::new(memory.messages().await?));
        }
        let mut messages = request.messages;
        messages.push(rejected.message.clone());
        messages.push(Message::user(prompt));
        Ok(ChatRequest::new(messages))
    }

    fn exhausted(&self, guardrail: String, failure: GuardrailFailure) -> Error {
        warn!(
            state = ?ControllerState::Failed,
            %guardrail,
            max_retries = self.max_retries,
            "maximum number of retries reached"
        );
        GuardrailError::new(
            GuardrailKind::Output,
            guardrail,
            failure.message,
            GuardrailErrorReason::RetriesExhausted {
                max_retries: self.max_retries,
            },
        )
        .with_cause(failure.cause)
        .into()
    }
}

impl std::fmt::Debug for RetryController<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("chain", &self.chain)
            .field("max_retries", &self.max_retries)
            .field("has_memory", &self.memory.is_some())
            .finish_non_exhaustive()
    }
}
