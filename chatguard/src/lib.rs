#![cfg_attr(docsrs, feature(doc_cfg))]
//! Guardrails for LLM chat invocations.
//!
//! chatguard wraps a chat model call in two validation chains:
//!
//! - **Input guardrails** check, and may rewrite, the user message before
//!   the model sees it.
//! - **Output guardrails** check, and may rewrite, the model response. They
//!   can also ask for a retry (the same request again) or a reprompt (a
//!   corrective user message, then another call), within a shared retry
//!   budget.
//!
//! An [`AiService`](service::AiService) composes the chains with a model
//! and conversation memory, for one-shot and streamed calls alike.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chatguard::prelude::*;
//!
//! let service = AiService::builder()
//!     .chat_model(Arc::new(my_model))
//!     .chat_memory_provider(Arc::new(InMemoryChatMemoryProvider::default()))
//!     .input_guardrail(MaxLengthInputGuardrail::new(2_000).into_guardrail())
//!     .output_guardrail(JsonExtractorOutputGuardrail::new().into_guardrail())
//!     .max_retries(3)
//!     .build()?;
//!
//! let person: Person = service
//!     .method("extract_person")
//!     .memory_id("user-42")
//!     .chat_typed("Ada Lovelace was born in 1815.")
//!     .await?;
//! ```

pub mod chat;
pub mod config;
pub mod controller;
pub mod error;
pub mod guardrail;
pub mod memory;
pub mod message;
pub mod prelude;
pub mod service;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
