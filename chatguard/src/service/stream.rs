//! Streaming invocations.
//!
//! With output guardrails, the chunks of every attempt are buffered and
//! only the accepted attempt is replayed to the caller, so text from a
//! rejected attempt never reaches it. A rewritten response is delivered as
//! a single chunk holding the final text. Without output guardrails chunks
//! are forwarded as they arrive.
//!
//! Dropping a [`ResponseStream`] cancels the invocation at its next await
//! point: the model stream, guardrail execution and the retry loop all stop.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tracing::Instrument;

use super::{GuardedResponse, MethodHandle, UserInput};
use crate::chat::{ModelError, ResponseAccumulator, StreamChunk};
use crate::controller::{ModelInvoker, StreamingModelInvoker, Validated};
use crate::error::{Error, Result};
use crate::telemetry::Telemetry;

/// One item of a [`ResponseStream`].
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A piece of the accepted response text.
    Partial(String),
    /// The invocation finished; always the last event.
    Complete(GuardedResponse),
}

/// Stream of [`StreamEvent`]s for one invocation.
pub struct ResponseStream<'a> {
    inner: Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send + 'a>>,
}

impl Stream for ResponseStream<'_> {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ResponseStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

impl ResponseStream<'_> {
    /// Drain the stream, returning the final response.
    ///
    /// # Errors
    ///
    /// Returns the first error yielded by the stream.
    pub async fn collect_response(mut self) -> Result<GuardedResponse> {
        while let Some(event) = self.next().await {
            if let StreamEvent::Complete(response) = event? {
                return Ok(response);
            }
        }
        Err(ModelError::stream("stream ended before the response was complete").into())
    }
}

impl<'a> MethodHandle<'a> {
    /// Invoke the method, streaming the accepted response.
    ///
    /// Errors are yielded as stream items; see [`chat`](Self::chat) for
    /// the possible errors.
    pub fn chat_stream(&self, input: impl Into<UserInput>) -> ResponseStream<'a> {
        ResponseStream {
            inner: Box::pin(invocation(self.clone(), input.into())),
        }
    }
}

fn invocation<'a>(
    handle: MethodHandle<'a>,
    input: UserInput,
) -> impl Stream<Item = Result<StreamEvent>> + Send + 'a {
    let (text, context) = handle.context(input);
    let span = Telemetry::invocation_span(&handle.name, context.invocation_id);

    try_stream! {
        let model = handle
            .service
            .streaming_model
            .as_deref()
            .ok_or_else(|| Error::from(ModelError::NotConfigured("streaming model")))?;
        let mut telemetry = Telemetry::new();
        let prepared = handle
            .prepare(text, &context, &mut telemetry.metrics)
            .instrument(span.clone())
            .await?;
        let mut invoker = StreamingModelInvoker::new(model);
        let validated: Validated;

        if handle.guardrails.output.is_empty() {
            let mut chunks = model.chat_stream(&prepared.request).await?;
            let mut acc = ResponseAccumulator::new();
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                if let StreamChunk::Partial(text) = &chunk {
                    yield StreamEvent::Partial(text.clone());
                }
                acc.push(chunk);
            }
            drop(chunks);
            let (_, response) = acc.finish()?;
            telemetry.metrics.record_usage(response.usage);
            validated = handle
                .validate(prepared, &context, response, &mut invoker, &mut telemetry.metrics)
                .instrument(span.clone())
                .await?;
        } else {
            let response = invoker
                .invoke(&prepared.request)
                .instrument(span.clone())
                .await?;
            telemetry.metrics.record_usage(response.usage);
            validated = handle
                .validate(prepared, &context, response, &mut invoker, &mut telemetry.metrics)
                .instrument(span.clone())
                .await?;
            if validated.rewritten {
                yield StreamEvent::Partial(validated.text().to_owned());
            } else {
                for partial in invoker.take_partials() {
                    yield StreamEvent::Partial(partial);
                }
            }
        }
        drop(invoker);

        let metrics = span.in_scope(|| telemetry.complete());
        yield StreamEvent::Complete(GuardedResponse::new(validated, metrics));
    }
}
