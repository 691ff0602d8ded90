//! Builder for [`AiService`].

use std::collections::HashMap;

use tracing::debug;

use super::{AiService, ConversationLocks, MemorySource};
use crate::chat::{SharedChatModel, SharedStreamingChatModel};
use crate::config::{GuardrailsConfig, MethodConfig, OutputGuardrailsConfig};
use crate::error::{Error, Result};
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::memory::{SharedChatMemory, SharedChatMemoryProvider};

/// Builder for [`AiService`].
///
/// Guardrails added here apply to every method; per-method guardrails are
/// declared with [`method`](Self::method) and run after them.
#[derive(Default)]
pub struct AiServiceBuilder {
    chat_model: Option<SharedChatModel>,
    streaming_model: Option<SharedStreamingChatModel>,
    memory: MemorySource,
    system_message: Option<String>,
    guardrails: GuardrailsConfig,
    methods: HashMap<String, MethodConfig>,
}

impl AiServiceBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model used by `chat` calls.
    #[must_use]
    pub fn chat_model(mut self, model: SharedChatModel) -> Self {
        self.chat_model = Some(model);
        self
    }

    /// Set the model used by `chat_stream` calls.
    #[must_use]
    pub fn streaming_model(mut self, model: SharedStreamingChatModel) -> Self {
        self.streaming_model = Some(model);
        self
    }

    /// Use a single memory for every conversation.
    #[must_use]
    pub fn chat_memory(mut self, memory: SharedChatMemory) -> Self {
        self.memory = MemorySource::Single(memory);
        self
    }

    /// Look memories up by memory id.
    #[must_use]
    pub fn chat_memory_provider(mut self, provider: SharedChatMemoryProvider) -> Self {
        self.memory = MemorySource::Provider(provider);
        self
    }

    /// Set the system message sent ahead of the conversation.
    #[must_use]
    pub fn system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    /// Add an input guardrail applied to every method.
    #[must_use]
    pub fn input_guardrail(mut self, guardrail: InputGuardrail) -> Self {
        self.guardrails.input_guardrails.push(guardrail);
        self
    }

    /// Add input guardrails applied to every method.
    #[must_use]
    pub fn input_guardrails(mut self, guardrails: impl IntoIterator<Item = InputGuardrail>) -> Self {
        self.guardrails.input_guardrails.extend(guardrails);
        self
    }

    /// Add an output guardrail applied to every method.
    #[must_use]
    pub fn output_guardrail(mut self, guardrail: OutputGuardrail) -> Self {
        self.guardrails.output_guardrails.push(guardrail);
        self
    }

    /// Add output guardrails applied to every method.
    #[must_use]
    pub fn output_guardrails(
        mut self,
        guardrails: impl IntoIterator<Item = OutputGuardrail>,
    ) -> Self {
        self.guardrails.output_guardrails.extend(guardrails);
        self
    }

    /// Set the output controller configuration.
    #[must_use]
    pub const fn output_guardrails_config(mut self, config: OutputGuardrailsConfig) -> Self {
        self.guardrails.output = config;
        self
    }

    /// Set the retry budget shared by retries and reprompts.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.guardrails.output.max_retries = max_retries;
        self
    }

    /// Declare a method with its own guardrails.
    ///
    /// Declaring the same method twice replaces the earlier configuration.
    #[must_use]
    pub fn method(mut self, name: impl Into<String>, config: MethodConfig) -> Self {
        self.methods.insert(name.into(), config);
        self
    }

    /// Resolve every method's guardrails and build the service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if neither a chat model nor a streaming
    /// model was set.
    pub fn build(self) -> Result<AiService> {
        if self.chat_model.is_none() && self.streaming_model.is_none() {
            return Err(Error::config(
                "an AI service needs a chat model or a streaming chat model",
            ));
        }

        let defaults = self.guardrails.resolve(None);
        let methods = self
            .methods
            .iter()
            .map(|(name, config)| {
                let resolved = self.guardrails.resolve(Some(config));
                debug!(
                    method = %name,
                    input = ?resolved.input.names(),
                    output = ?resolved.output.names(),
                    max_retries = resolved.max_retries,
                    "resolved method guardrails"
                );
                (name.clone(), resolved)
            })
            .collect();

        Ok(AiService {
            chat_model: self.chat_model,
            streaming_model: self.streaming_model,
            memory: self.memory,
            system_message: self.system_message,
            defaults,
            methods,
            conversations: ConversationLocks::default(),
        })
    }
}

impl std::fmt::Debug for AiServiceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiServiceBuilder")
            .field("has_chat_model", &self.chat_model.is_some())
            .field("has_streaming_model", &self.streaming_model.is_some())
            .field("system_message", &self.system_message)
            .field("guardrails", &self.guardrails)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
