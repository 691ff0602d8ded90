//! Chat model boundary.
//!
//! The guardrail pipeline treats the model as an opaque function from a
//! [`ChatRequest`] to a [`ChatResponse`]. [`ChatModel`] is the synchronous
//! (single response) form, [`StreamingChatModel`] the streamed one.
//! Provider wire formats never leak past this module.

mod error;
mod streaming;

pub use error::ModelError;
pub use streaming::{
    ChatStream, ResponseAccumulator, SharedStreamingChatModel, StreamChunk, StreamingChatModel,
};

use std::ops::{Add, AddAssign};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{Message, Role};

/// A request sent to a chat model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The full conversation to send, oldest first.
    pub messages: Vec<Message>,
}

impl ChatRequest {
    /// Create a request from a conversation.
    #[must_use]
    pub const fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Returns the messages of this request.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the most recent user message, if any.
    #[must_use]
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the message.
    Stop,
    /// Token limit reached.
    Length,
    /// Provider-side content filter.
    ContentFilter,
    /// Anything else.
    Other,
}

/// Token usage reported for a single model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u32,
    /// Completion tokens.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Total tokens (input + output), saturating at `u32::MAX`.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens.saturating_add(rhs.input_tokens),
            output_tokens: self.output_tokens.saturating_add(rhs.output_tokens),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// A complete model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The assistant message.
    pub message: Message,
    /// Why generation stopped, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Token usage, when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ChatResponse {
    /// Create a response holding an assistant message with the given text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(text),
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        }
    }

    /// Set token usage.
    #[must_use]
    pub const fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Returns the response text.
    #[must_use]
    pub fn text(&self) -> &str {
        self.message.text()
    }

    /// Returns a copy of this response with its text replaced.
    ///
    /// Metadata (finish reason, usage) is kept.
    #[must_use]
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(text),
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// A chat model producing one complete response per request.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send a request and wait for the complete response.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// A shared, reference-counted chat model.
pub type SharedChatModel = Arc<dyn ChatModel>;
