//! Conversation memory.
//!
//! The [`ChatMemory`] trait is the boundary to conversation storage. The
//! invocation orchestrator and the retry/reprompt controller are the only
//! writers; guardrails get a read-only snapshot of the messages.
//!
//! - [`MessageWindowChatMemory`] keeps the most recent messages in process.
//! - [`ChatMemoryProvider`] maps a memory id to a memory, so concurrent
//!   conversations stay separate.

mod error;
mod provider;
mod window;

pub use error::{MemoryError, MemoryResult};
pub use provider::{ChatMemoryProvider, InMemoryChatMemoryProvider, SharedChatMemoryProvider};
pub use window::{DEFAULT_MAX_MESSAGES, MessageWindowChatMemory};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// Async trait for conversation memory.
///
/// Stores a chronological sequence of [`Message`]s identified by a memory
/// id. Implementations use interior mutability and must be `Send + Sync`,
/// since one memory may be shared across tasks.
#[async_trait]
#[diagnostic::on_unimplemented(
    message = "`{Self}` does not implement the `ChatMemory` trait",
    label = "this type cannot be used as conversation memory",
    note = "implement `ChatMemory` to store conversation history for a service"
)]
pub trait ChatMemory: Send + Sync {
    /// Returns the memory identifier.
    fn id(&self) -> &str;

    /// Returns all retained messages, oldest first.
    async fn messages(&self) -> Result<Vec<Message>>;

    /// Appends a message.
    async fn add(&self, message: Message) -> Result<()>;

    /// Removes and returns the most recent message.
    ///
    /// Returns `Ok(None)` if the memory is empty.
    async fn pop(&self) -> Result<Option<Message>>;

    /// Removes all messages.
    async fn clear(&self) -> Result<()>;

    /// Returns the number of retained messages.
    async fn len(&self) -> Result<usize> {
        Ok(self.messages().await?.len())
    }

    /// Returns `true` if no message is retained.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// A shared, reference-counted memory for use across tasks.
pub type SharedChatMemory = Arc<dyn ChatMemory>;
