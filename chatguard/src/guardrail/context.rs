//! Per-invocation context visible to every guardrail.

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Describes the AI-service invocation a guardrail is validating.
///
/// Built once per call by the orchestrator and shared, read-only, with
/// every guardrail of both chains.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationContext {
    /// Unique id of this invocation.
    pub invocation_id: Uuid,
    /// Name of the service method being invoked.
    pub method: String,
    /// Memory id of the conversation, if the service keeps memory.
    pub memory_id: Option<String>,
    /// The user message template the text was rendered from, if any.
    pub user_message_template: Option<String>,
    /// Variables the template was rendered with.
    pub variables: Map<String, Value>,
}

impl InvocationContext {
    /// Create a context for a method with a fresh invocation id.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            method: method.into(),
            memory_id: None,
            user_message_template: None,
            variables: Map::new(),
        }
    }

    /// Set the memory id.
    #[must_use]
    pub fn with_memory_id(mut self, memory_id: Option<String>) -> Self {
        self.memory_id = memory_id;
        self
    }

    /// Set the template and the variables it was rendered with.
    #[must_use]
    pub fn with_template(mut self, template: Option<String>, variables: Map<String, Value>) -> Self {
        self.user_message_template = template;
        self.variables = variables;
        self
    }

    /// Look up a template variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new(crate::service::DEFAULT_METHOD)
    }
}
