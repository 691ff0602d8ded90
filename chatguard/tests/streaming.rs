//! Streaming invocations: buffering, pass-through and cancellation.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chatguard::prelude::*;
use common::{HangingModel, MockModel, append, counting_output};
use futures::StreamExt;

async fn drain(stream: chatguard::service::ResponseStream<'_>) -> (Vec<String>, Result<GuardedResponse>) {
    let events: Vec<Result<StreamEvent>> = stream.collect().await;
    let mut partials = Vec::new();
    for event in events {
        match event {
            Ok(StreamEvent::Partial(text)) => partials.push(text),
            Ok(StreamEvent::Complete(response)) => return (partials, Ok(response)),
            Err(err) => return (partials, Err(err)),
        }
    }
    panic!("stream ended without a final event");
}

#[tokio::test]
async fn only_accepted_attempt_reaches_caller() {
    let model = MockModel::new(["bad first answer", "good answer"]);
    let (guardrail, count) = counting_output("quality", |text| {
        if text.starts_with("bad") {
            OutputGuardrailResult::retry("low quality")
        } else {
            OutputGuardrailResult::success()
        }
    });
    let service = AiService::builder()
        .streaming_model(Arc::clone(&model) as _)
        .output_guardrail(guardrail)
        .build()
        .unwrap();

    let (partials, response) = drain(service.chat_stream("question")).await;

    assert_eq!(partials, vec!["good ", "answer"]);
    let response = response.unwrap();
    assert_eq!(response.text, "good answer");
    assert_eq!(response.metrics.retries, 1);
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn partials_pass_through_without_output_guardrails() {
    let model = MockModel::new(["streamed right away"]);
    let service = AiService::builder()
        .streaming_model(Arc::clone(&model) as _)
        .build()
        .unwrap();

    let (partials, response) = drain(service.chat_stream("go")).await;

    assert_eq!(partials, vec!["streamed ", "right ", "away"]);
    assert_eq!(response.unwrap().text, "streamed right away");
}

#[tokio::test]
async fn rewritten_attempt_is_delivered_as_final_text() {
    let model = MockModel::new(["Hi there"]);
    let service = AiService::builder()
        .streaming_model(Arc::clone(&model) as _)
        .output_guardrail(append("sign", " -- bot"))
        .build()
        .unwrap();

    let (partials, response) = drain(service.chat_stream("hello")).await;

    assert_eq!(partials, vec!["Hi there -- bot"]);
    assert_eq!(response.unwrap().text, "Hi there -- bot");
}

#[tokio::test]
async fn input_failure_is_the_only_item() {
    let model = MockModel::new(["unused"]);
    let service = AiService::builder()
        .streaming_model(Arc::clone(&model) as _)
        .input_guardrail(MaxLengthInputGuardrail::new(5).into_guardrail())
        .build()
        .unwrap();

    let events: Vec<_> = service.chat_stream("far too long").collect().await;

    assert_eq!(events.len(), 1);
    let err = tokio_test::assert_err!(&events[0]);
    assert!(err.is_input_guardrail());
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn exhausted_budget_is_reported_as_stream_error() {
    let model = MockModel::new(["never good"]);
    let (guardrail, _) = counting_output("picky", |_| OutputGuardrailResult::retry("no"));
    let service = AiService::builder()
        .streaming_model(Arc::clone(&model) as _)
        .output_guardrail(guardrail)
        .max_retries(1)
        .build()
        .unwrap();

    let (partials, response) = drain(service.chat_stream("hi")).await;

    assert!(partials.is_empty());
    assert!(response.unwrap_err().guardrail().unwrap().is_retries_exhausted());
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn dropping_the_stream_cancels_the_invocation() {
    let model = Arc::new(HangingModel::default());
    let dropped = Arc::clone(&model.dropped);
    let (guardrail, count) = counting_output("never-run", |_| OutputGuardrailResult::success());
    let service = AiService::builder()
        .streaming_model(Arc::clone(&model) as _)
        .output_guardrail(guardrail)
        .build()
        .unwrap();

    let mut stream = service.chat_stream("think hard");
    let first = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
    assert!(first.is_err(), "nothing is emitted before the attempt completes");
    assert!(!dropped.load(Ordering::SeqCst));

    drop(stream);

    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn collect_response_returns_final_event() -> anyhow::Result<()> {
    let model = MockModel::new(["done"]);
    let service = AiService::builder()
        .streaming_model(Arc::clone(&model) as _)
        .build()?;

    let response = service.chat_stream("x").collect_response().await?;
    assert_eq!(response.text, "done");
    Ok(())
}
