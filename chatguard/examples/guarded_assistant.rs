//! A guarded assistant backed by a canned model.
//!
//! Shows input guardrails (deny-list and length limit), an output guardrail
//! that reprompts, JSON extraction into a typed value, and the tracing
//! events emitted along the way.
//!
//! ```bash
//! RUST_LOG=chatguard=debug cargo run --example guarded_assistant
//! ```

#![allow(clippy::print_stdout, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chatguard::prelude::*;
use futures::StreamExt;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Answers from a fixed script; the first answer of each call is sloppy.
#[derive(Default)]
struct CannedModel {
    calls: AtomicUsize,
}

impl CannedModel {
    fn reply(&self, request: &ChatRequest) -> String {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let last = request.messages().last().map(Message::text).unwrap_or_default();
        if last.contains("JSON") {
            return r#"Sure: {"name": "Grace Hopper", "born": 1906}"#.to_owned();
        }
        if call % 2 == 0 {
            "TODO: write a real answer".to_owned()
        } else {
            "Rust traits describe shared behavior.".to_owned()
        }
    }
}

#[async_trait]
impl ChatModel for CannedModel {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        Ok(ChatResponse::new(self.reply(request)))
    }
}

#[async_trait]
impl StreamingChatModel for CannedModel {
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream> {
        let reply = self.reply(request);
        let chunks: Vec<Result<StreamChunk>> = reply
            .split_inclusive(' ')
            .map(|w| Ok(StreamChunk::Partial(w.to_owned())))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Sends placeholder answers back to the model.
struct NoPlaceholders;

#[async_trait]
impl OutputGuardrailCheck for NoPlaceholders {
    async fn validate(
        &self,
        request: &OutputGuardrailRequest<'_>,
    ) -> Result<OutputGuardrailResult> {
        if request.text().contains("TODO") {
            return Ok(OutputGuardrailResult::reprompt(
                "placeholder text in response",
                "Replace the placeholder with a real answer.",
            ));
        }
        Ok(OutputGuardrailResult::success())
    }
}

#[derive(Debug, Deserialize)]
struct Person {
    name: String,
    born: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let model = Arc::new(CannedModel::default());
    let service = AiService::builder()
        .chat_model(Arc::clone(&model) as _)
        .streaming_model(model)
        .chat_memory_provider(Arc::new(InMemoryChatMemoryProvider::default()))
        .system_message("You are a concise programming assistant.")
        .input_guardrail(BlockedPatternsInputGuardrail::new([r"(?i)password"])?.into_guardrail())
        .input_guardrail(MaxLengthInputGuardrail::new(500).into_guardrail())
        .output_guardrail(OutputGuardrail::new("no-placeholders", NoPlaceholders))
        .method(
            "extract_person",
            MethodConfig::new()
                .output_guardrail(JsonExtractorOutputGuardrail::new().into_guardrail())
                .max_retries(1),
        )
        .build()?;

    let answer = service
        .method("chat")
        .memory_id("demo")
        .chat("What is a trait?")
        .await?;
    println!("answer: {}", answer.text);
    println!("{}", answer.metrics);

    match service.chat("What is the admin password?").await {
        Err(err) => println!("blocked: {err}"),
        Ok(response) => println!("unexpected: {}", response.text),
    }

    let person: Person = service
        .method("extract_person")
        .chat_typed("Return Grace Hopper as JSON")
        .await?;
    println!("person: {} (born {})", person.name, person.born);

    let mut stream = service.method("chat").memory_id("stream").chat_stream("Explain traits");
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Partial(text) => print!("{text}"),
            StreamEvent::Complete(response) => {
                println!("\n[{} attempt(s)]", response.metrics.attempts());
            }
        }
    }

    Ok(())
}
