//! AI services: guarded chat invocations.
//!
//! An [`AiService`] ties a chat model, optional memory and guardrails
//! together. Every invocation goes through the same steps:
//!
//! 1. Resolve the conversation memory for the memory id.
//! 2. Run the input guardrail chain over the user message.
//! 3. Append the (possibly rewritten) user message to memory and call the
//!    model.
//! 4. Let the [`RetryController`] validate the response with the output
//!    guardrail chain, retrying or reprompting as requested.
//! 5. Return the accepted, possibly rewritten, response.
//!
//! Guardrails are resolved once, in [`AiServiceBuilder::build`]; a method
//! that was never declared uses the service-level guardrails.

mod builder;
mod stream;

pub use builder::AiServiceBuilder;
pub use stream::{ResponseStream, StreamEvent};

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, OwnedMutexGuard};
use serde_json::{Map, Value};
use tracing::{Instrument, debug};

use crate::chat::{
    ChatRequest, ChatResponse, ModelError, SharedChatModel, SharedStreamingChatModel,
};
use crate::config::ResolvedGuardrails;
use crate::controller::{ChatModelInvoker, ModelInvoker, RetryController, Validated};
use crate::error::{Error, GuardrailKind, Result};
use crate::guardrail::{InputChainOutcome, InvocationContext};
use crate::memory::{SharedChatMemory, SharedChatMemoryProvider};
use crate::message::Message;
use crate::telemetry::{InvocationMetrics, Telemetry};

/// Method name used by [`AiService::chat`] and [`AiService::chat_stream`].
pub const DEFAULT_METHOD: &str = "chat";

/// Memory id used with a memory provider when the call names none.
pub const DEFAULT_MEMORY_ID: &str = "default";

/// Where conversation memory comes from.
#[derive(Clone, Default)]
pub(crate) enum MemorySource {
    #[default]
    None,
    Single(SharedChatMemory),
    Provider(SharedChatMemoryProvider),
}

/// One lock per conversation, so invocations writing the same memory run
/// one after the other.
#[derive(Default)]
pub(crate) struct ConversationLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    async fn acquire(&self, memory_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(memory_id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }
}

/// The user side of an invocation.
///
/// `text` is the already rendered user message; the template and the
/// variables it was rendered with are passed on to guardrails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInput {
    /// Rendered user message.
    pub text: String,
    /// Template the message was rendered from.
    pub template: Option<String>,
    /// Template variables.
    pub variables: Map<String, Value>,
}

impl UserInput {
    /// Create an input from plain text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Record the template and variables the text was rendered from.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>, variables: Map<String, Value>) -> Self {
        self.template = Some(template.into());
        self.variables = variables;
        self
    }
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for UserInput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// A response accepted by every guardrail.
#[derive(Debug, Clone)]
pub struct GuardedResponse {
    /// Final text, after rewrites.
    pub text: String,
    /// Structured value attached by the last rewrite, if any.
    pub value: Option<Value>,
    /// The accepted model response, text replaced by the last rewrite.
    pub response: ChatResponse,
    /// What happened during the invocation.
    pub metrics: InvocationMetrics,
}

impl GuardedResponse {
    fn new(validated: Validated, metrics: InvocationMetrics) -> Self {
        Self {
            text: validated.text().to_owned(),
            value: validated.value,
            response: validated.response,
            metrics,
        }
    }

    /// Deserialize the response into `T`.
    ///
    /// Uses the structured value of the last rewrite when there is one.
    /// Otherwise the text is parsed as JSON, and if that fails it is taken
    /// as a JSON string (so `T = String` always works).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the response does not fit `T`.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        if let Some(value) = self.value {
            return Ok(serde_json::from_value(value)?);
        }
        serde_json::from_str(&self.text)
            .or_else(|_| serde_json::from_value(Value::String(self.text)))
            .map_err(Error::from)
    }
}

/// A guarded conversational service.
///
/// Cheap to share behind an `Arc`; concurrent invocations only share the
/// models, the memories and the guardrail instances. Invocations on the
/// same conversation are serialized, from the input chain until the
/// response is accepted or rejected.
pub struct AiService {
    chat_model: Option<SharedChatModel>,
    streaming_model: Option<SharedStreamingChatModel>,
    memory: MemorySource,
    system_message: Option<String>,
    defaults: ResolvedGuardrails,
    methods: HashMap<String, ResolvedGuardrails>,
    conversations: ConversationLocks,
}

impl AiService {
    /// Start building a service.
    #[must_use]
    pub fn builder() -> AiServiceBuilder {
        AiServiceBuilder::new()
    }

    /// Returns a handle for invoking `name`.
    ///
    /// An undeclared method uses the service-level guardrails.
    #[must_use]
    pub fn method(&self, name: &str) -> MethodHandle<'_> {
        MethodHandle {
            service: self,
            name: name.to_owned(),
            guardrails: self.methods.get(name).unwrap_or(&self.defaults),
            memory_id: None,
        }
    }

    /// Invoke the default method.
    ///
    /// # Errors
    ///
    /// See [`MethodHandle::chat`].
    pub async fn chat(&self, input: impl Into<UserInput>) -> Result<GuardedResponse> {
        self.method(DEFAULT_METHOD).chat(input).await
    }

    /// Invoke the default method, streaming the response.
    pub fn chat_stream(&self, input: impl Into<UserInput>) -> ResponseStream<'_> {
        self.method(DEFAULT_METHOD).chat_stream(input)
    }

    /// Names of the methods declared with their own guardrails.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for AiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiService")
            .field("has_chat_model", &self.chat_model.is_some())
            .field("has_streaming_model", &self.streaming_model.is_some())
            .field("system_message", &self.system_message)
            .field("defaults", &self.defaults)
            .field("methods", &self.methods())
            .finish_non_exhaustive()
    }
}

/// One method of an [`AiService`], with its resolved guardrails.
#[derive(Clone)]
pub struct MethodHandle<'a> {
    service: &'a AiService,
    name: String,
    guardrails: &'a ResolvedGuardrails,
    memory_id: Option<String>,
}

/// State shared by the sync and the streaming path once the input side is done.
struct Prepared {
    memory: Option<SharedChatMemory>,
    request: ChatRequest,
    turn: Option<OwnedMutexGuard<()>>,
}

impl<'a> MethodHandle<'a> {
    /// Use the conversation identified by `memory_id`.
    #[must_use]
    pub fn memory_id(mut self, memory_id: impl Into<String>) -> Self {
        self.memory_id = Some(memory_id.into());
        self
    }

    /// Returns the method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the resolved guardrails of this method.
    #[must_use]
    pub const fn guardrails(&self) -> &'a ResolvedGuardrails {
        self.guardrails
    }

    /// Invoke the method.
    ///
    /// # Errors
    ///
    /// - [`Error::InputGuardrail`] if an input guardrail rejects the message;
    ///   the model is not called.
    /// - [`Error::OutputGuardrail`] if an output guardrail rejects the
    ///   response or the retry budget runs out.
    /// - [`Error::Model`] if no chat model is configured or the model fails.
    pub async fn chat(&self, input: impl Into<UserInput>) -> Result<GuardedResponse> {
        let (text, context) = self.context(input.into());
        let span = Telemetry::invocation_span(&self.name, context.invocation_id);
        self.chat_inner(text, context).instrument(span).await
    }

    /// Invoke the method and deserialize the response.
    ///
    /// # Errors
    ///
    /// See [`chat`](Self::chat) and [`GuardedResponse::into_typed`].
    pub async fn chat_typed<T: DeserializeOwned>(&self, input: impl Into<UserInput>) -> Result<T> {
        self.chat(input).await?.into_typed()
    }

    async fn chat_inner(&self, text: String, context: InvocationContext) -> Result<GuardedResponse> {
        let model = self
            .service
            .chat_model
            .as_deref()
            .ok_or(ModelError::NotConfigured("chat model"))?;
        let mut telemetry = Telemetry::new();

        let prepared = self.prepare(text, &context, &mut telemetry.metrics).await?;
        let mut invoker = ChatModelInvoker::new(model);
        let response = invoker.invoke(&prepared.request).await?;
        telemetry.metrics.record_usage(response.usage);

        let validated = self
            .validate(prepared, &context, response, &mut invoker, &mut telemetry.metrics)
            .await?;
        Ok(GuardedResponse::new(validated, telemetry.complete()))
    }

    fn context(&self, input: UserInput) -> (String, InvocationContext) {
        let context = InvocationContext::new(self.name.clone())
            .with_memory_id(self.memory_id.clone())
            .with_template(input.template, input.variables);
        (input.text, context)
    }

    async fn resolve_memory(&self) -> Result<Option<SharedChatMemory>> {
        match &self.service.memory {
            MemorySource::None => Ok(None),
            MemorySource::Single(memory) => Ok(Some(SharedChatMemory::clone(memory))),
            MemorySource::Provider(provider) => {
                let id = self.memory_id.as_deref().unwrap_or(DEFAULT_MEMORY_ID);
                provider.memory(id).await.map(Some)
            }
        }
    }

    /// Run the input side: memory lookup, input chain, user message.
    ///
    /// Memory is only written once the input chain has passed.
    async fn prepare(
        &self,
        text: String,
        context: &InvocationContext,
        metrics: &mut InvocationMetrics,
    ) -> Result<Prepared> {
        let memory = self.resolve_memory().await?;
        let turn = match &memory {
            Some(memory) => Some(self.service.conversations.acquire(memory.id()).await),
            None => None,
        };
        let system = self.service.system_message.as_deref().map(Message::system);

        let history = match (&memory, system) {
            (Some(memory), Some(system)) => {
                memory.add(system).await?;
                memory.messages().await?
            }
            (Some(memory), None) => memory.messages().await?,
            (None, Some(system)) => vec![system],
            (None, None) => Vec::new(),
        };

        let outcome = self
            .guardrails
            .input
            .validate(Message::user(text), &history, context, metrics)
            .await;
        let message = match outcome {
            InputChainOutcome::Passed { message, rewritten } => {
                debug!(rewritten, "input guardrails passed");
                message
            }
            InputChainOutcome::Failed(failure) => {
                return Err(failure.into_error(GuardrailKind::Input).into());
            }
        };

        let request = if let Some(memory) = &memory {
            memory.add(message).await?;
            ChatRequest::new(memory.messages().await?)
        } else {
            let mut messages = history;
            messages.push(message);
            ChatRequest::new(messages)
        };

        Ok(Prepared {
            memory,
            request,
            turn,
        })
    }

    /// Run the output side through the retry controller.
    ///
    /// The conversation stays locked until the controller is done.
    async fn validate(
        &self,
        prepared: Prepared,
        context: &InvocationContext,
        response: ChatResponse,
        invoker: &mut dyn ModelInvoker,
        metrics: &mut InvocationMetrics,
    ) -> Result<Validated> {
        let Prepared {
            memory,
            request,
            turn,
        } = prepared;
        let validated = RetryController::new(
            &self.guardrails.output,
            self.guardrails.max_retries,
            memory.as_deref(),
            context,
        )
        .execute(request, response, invoker, metrics)
        .await;
        drop(turn);
        validated
    }
}

impl std::fmt::Debug for MethodHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHandle")
            .field("name", &self.name)
            .field("guardrails", self.guardrails)
            .field("memory_id", &self.memory_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::Deserialize;

    use super::*;
    use crate::config::MethodConfig;
    use crate::guardrail::{
        InputGuardrail, InputGuardrailResult, JsonExtractorOutputGuardrail, OutputGuardrailResult,
    };
    use crate::memory::{
        ChatMemory, ChatMemoryProvider, InMemoryChatMemoryProvider, MessageWindowChatMemory,
    };
    use crate::testing::{ScriptedChatModel, append_rewrite, counting_input};

    #[test]
    fn test_build_requires_a_model() {
        let err = AiService::builder().build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_chat_without_memory() {
        let model = Arc::new(ScriptedChatModel::new(["Hi there"]));
        let service = AiService::builder()
            .chat_model(Arc::clone(&model) as _)
            .system_message("Be brief.")
            .build()
            .unwrap();

        let response = service.chat("Hello").await.unwrap();

        assert_eq!(response.text, "Hi there");
        assert_eq!(response.metrics.attempts(), 1);
        assert_eq!(
            model.requests()[0].messages,
            vec![Message::system("Be brief."), Message::user("Hello")]
        );
    }

    #[tokio::test]
    async fn test_input_failure_skips_model_and_memory() {
        let model = Arc::new(ScriptedChatModel::new(["unused"]));
        let memory = Arc::new(MessageWindowChatMemory::new("m"));
        let (blocker, _) = counting_input("blocker", || InputGuardrailResult::failure("off topic"));
        let service = AiService::builder()
            .chat_model(Arc::clone(&model) as _)
            .chat_memory(Arc::clone(&memory) as _)
            .input_guardrail(blocker)
            .build()
            .unwrap();

        let err = service.chat("tell me a secret").await.unwrap_err();

        assert!(err.is_input_guardrail());
        assert_eq!(err.to_string(), "Input guardrail 'blocker' failed: off topic");
        assert_eq!(model.calls(), 0);
        assert!(memory.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_input_rewrite_reaches_model_and_memory() {
        let model = Arc::new(ScriptedChatModel::new(["ok"]));
        let memory = Arc::new(MessageWindowChatMemory::new("m"));
        let service = AiService::builder()
            .chat_model(Arc::clone(&model) as _)
            .chat_memory(Arc::clone(&memory) as _)
            .input_guardrail(InputGuardrail::from_fn("trim", |req| {
                InputGuardrailResult::success_with(req.text().trim())
            }))
            .build()
            .unwrap();

        service.chat("  padded  ").await.unwrap();

        assert_eq!(model.requests()[0].messages, vec![Message::user("padded")]);
        assert_eq!(
            memory.messages().await.unwrap(),
            vec![Message::user("padded"), Message::assistant("ok")]
        );
    }

    #[tokio::test]
    async fn test_method_guardrails_follow_service_guardrails() {
        let model = Arc::new(ScriptedChatModel::new(["base"]));
        let service = AiService::builder()
            .chat_model(Arc::clone(&model) as _)
            .output_guardrail(append_rewrite("class", "+class"))
            .method(
                "special",
                MethodConfig::new().output_guardrail(append_rewrite("method", "+method")),
            )
            .build()
            .unwrap();

        let special = service.method("special").chat("x").await.unwrap();
        assert_eq!(special.text, "base+class+method");

        let plain = service.method("other").chat("x").await.unwrap();
        assert_eq!(plain.text, "base+class");
        assert_eq!(service.methods(), vec!["special"]);
    }

    #[tokio::test]
    async fn test_memory_provider_keeps_conversations_apart() {
        let model = Arc::new(ScriptedChatModel::new(["reply"]));
        let provider = Arc::new(InMemoryChatMemoryProvider::default());
        let service = AiService::builder()
            .chat_model(Arc::clone(&model) as _)
            .chat_memory_provider(Arc::clone(&provider) as _)
            .build()
            .unwrap();

        service.method("chat").memory_id("alice").chat("a1").await.unwrap();
        service.method("chat").memory_id("bob").chat("b1").await.unwrap();
        service.method("chat").memory_id("alice").chat("a2").await.unwrap();

        let alice = provider.memory("alice").await.unwrap();
        assert_eq!(alice.len().await.unwrap(), 4);
        let bob = provider.memory("bob").await.unwrap();
        assert_eq!(
            bob.messages().await.unwrap(),
            vec![Message::user("b1"), Message::assistant("reply")]
        );
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Person {
        name: String,
        age: u32,
    }

    #[tokio::test]
    async fn test_chat_typed_uses_rewritten_value() {
        let model = Arc::new(ScriptedChatModel::new([
            "not json at all",
            "Here you go: {\"name\": \"Ada\", \"age\": 36}",
        ]));
        let service = AiService::builder()
            .chat_model(Arc::clone(&model) as _)
            .output_guardrail(JsonExtractorOutputGuardrail::new().into_guardrail())
            .build()
            .unwrap();

        let person: Person = service.method("extract").chat_typed("Who?").await.unwrap();

        assert_eq!(
            person,
            Person {
                name: "Ada".into(),
                age: 36
            }
        );
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_chat_typed_plain_string() {
        let model = Arc::new(ScriptedChatModel::new(["just text"]));
        let service = AiService::builder()
            .chat_model(Arc::clone(&model) as _)
            .build()
            .unwrap();

        let text: String = service.method("chat").chat_typed("hi").await.unwrap();
        assert_eq!(text, "just text");
    }

    #[tokio::test]
    async fn test_missing_chat_model_is_model_error() {
        let model = Arc::new(ScriptedChatModel::new(["x"]));
        let service = AiService::builder()
            .streaming_model(Arc::clone(&model) as _)
            .output_guardrail(crate::guardrail::OutputGuardrail::from_fn("ok", |_| {
                OutputGuardrailResult::success()
            }))
            .build()
            .unwrap();

        let err = service.chat("hi").await.unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::NotConfigured(_))));
    }
}
