//! Memory lookup by memory id.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{DEFAULT_MAX_MESSAGES, MemoryError, MessageWindowChatMemory, SharedChatMemory};
use crate::error::Result;

/// Resolves the memory of one conversation.
#[async_trait]
pub trait ChatMemoryProvider: Send + Sync {
    /// Returns the memory for `memory_id`, creating it if needed.
    async fn memory(&self, memory_id: &str) -> Result<SharedChatMemory>;
}

/// A shared, reference-counted memory provider.
pub type SharedChatMemoryProvider = Arc<dyn ChatMemoryProvider>;

/// Lazily creates one [`MessageWindowChatMemory`] per memory id.
pub struct InMemoryChatMemoryProvider {
    max_messages: usize,
    memories: RwLock<HashMap<String, SharedChatMemory>>,
}

impl fmt::Debug for InMemoryChatMemoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryChatMemoryProvider")
            .field("max_messages", &self.max_messages)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryChatMemoryProvider {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl InMemoryChatMemoryProvider {
    /// Create a provider whose memories retain at most `max_messages`.
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            memories: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the ids of all memories created so far.
    pub async fn memory_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.memories.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ChatMemoryProvider for InMemoryChatMemoryProvider {
    async fn memory(&self, memory_id: &str) -> Result<SharedChatMemory> {
        if memory_id.trim().is_empty() {
            return Err(MemoryError::InvalidId(memory_id.to_owned()).into());
        }
        if let Some(memory) = self.memories.read().await.get(memory_id) {
            return Ok(Arc::clone(memory));
        }

        let mut memories = self.memories.write().await;
        let memory = memories.entry(memory_id.to_owned()).or_insert_with(|| {
            debug!(memory_id, "creating chat memory");
            Arc::new(MessageWindowChatMemory::with_max_messages(
                memory_id,
                self.max_messages,
            ))
        });
        Ok(Arc::clone(memory))
    }
}
