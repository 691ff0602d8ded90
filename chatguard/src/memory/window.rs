//! In-process sliding-window memory.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use super::{ChatMemory, MemoryResult};
use crate::error::Result;
use crate::message::Message;

/// Default number of messages retained by [`MessageWindowChatMemory`].
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Keeps the most recent `max_messages` messages.
///
/// A system message is always kept at the front and is never evicted.
/// Adding a new system message replaces the previous one; adding the same
/// system message again is a no-op.
#[derive(Debug)]
pub struct MessageWindowChatMemory {
    id: String,
    max_messages: usize,
    messages: RwLock<Vec<Message>>,
}

impl MessageWindowChatMemory {
    /// Create a window memory with [`DEFAULT_MAX_MESSAGES`].
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_max_messages(id, DEFAULT_MAX_MESSAGES)
    }

    /// Create a window memory retaining at most `max_messages` (minimum 1).
    #[must_use]
    pub fn with_max_messages(id: impl Into<String>, max_messages: usize) -> Self {
        Self {
            id: id.into(),
            max_messages: max_messages.max(1),
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Restore a memory from a JSON array of messages.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Serialization`](super::MemoryError::Serialization)
    /// if `json` is not a valid message array.
    pub fn from_json(id: impl Into<String>, max_messages: usize, json: &str) -> MemoryResult<Self> {
        let max_messages = max_messages.max(1);
        let mut restored: Vec<Message> = serde_json::from_str(json)?;
        evict(&mut restored, max_messages);
        Ok(Self {
            id: id.into(),
            max_messages,
            messages: RwLock::new(restored),
        })
    }

    /// Serialize the retained messages as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Serialization`](super::MemoryError::Serialization)
    /// if serialization fails.
    pub async fn to_json(&self) -> MemoryResult<String> {
        let messages = self.messages.read().await;
        Ok(serde_json::to_string(&*messages)?)
    }

    /// Returns the window size.
    #[must_use]
    pub const fn max_messages(&self) -> usize {
        self.max_messages
    }
}

/// Drop the oldest non-system messages until the window fits.
fn evict(messages: &mut Vec<Message>, max_messages: usize) {
    while messages.len() > max_messages {
        let Some(pos) = messages.iter().position(|m| !m.is_system()) else {
            break;
        };
        let evicted = messages.remove(pos);
        trace!(role = %evicted.role, "evicted message from memory window");
    }
}

#[async_trait]
impl ChatMemory for MessageWindowChatMemory {
    fn id(&self) -> &str {
        &self.id
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        Ok(self.messages.read().await.clone())
    }

    async fn add(&self, message: Message) -> Result<()> {
        let mut messages = self.messages.write().await;
        if message.is_system() {
            if let Some(pos) = messages.iter().position(Message::is_system) {
                if messages[pos] == message {
                    return Ok(());
                }
                messages.remove(pos);
            }
            messages.insert(0, message);
        } else {
            messages.push(message);
        }
        evict(&mut messages, self.max_messages);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Message>> {
        Ok(self.messages.write().await.pop())
    }

    async fn clear(&self) -> Result<()> {
        self.messages.write().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.messages.read().await.len())
    }
}
