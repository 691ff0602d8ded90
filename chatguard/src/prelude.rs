//! Commonly used types, for glob import.

pub use crate::chat::{
    ChatModel, ChatRequest, ChatResponse, ChatStream, SharedChatModel, SharedStreamingChatModel,
    StreamChunk, StreamingChatModel, TokenUsage,
};
pub use crate::config::{DEFAULT_MAX_RETRIES, MethodConfig, OutputGuardrailsConfig};
pub use crate::error::{Error, GuardrailError, GuardrailKind, Result};
pub use crate::guardrail::{
    BlockedPatternsInputGuardrail, InputGuardrail, InputGuardrailCheck, InputGuardrailRequest,
    InputGuardrailResult, InvocationContext, JsonExtractorOutputGuardrail, MaxLengthInputGuardrail,
    OutputGuardrail, OutputGuardrailCheck, OutputGuardrailRequest, OutputGuardrailResult,
};
pub use crate::memory::{
    ChatMemory, ChatMemoryProvider, InMemoryChatMemoryProvider, MessageWindowChatMemory,
    SharedChatMemory,
};
pub use crate::message::{Message, Role};
pub use crate::service::{AiService, GuardedResponse, StreamEvent, UserInput};
pub use crate::telemetry::InvocationMetrics;
