//! Streamed model responses.
//!
//! A [`StreamingChatModel`] returns a [`ChatStream`] of [`StreamChunk`]s:
//! zero or more partial text deltas followed, optionally, by the complete
//! response. Stream errors are delivered as `Err` items. The
//! [`ResponseAccumulator`] buffers the partial chunks of one attempt and
//! assembles the final [`ChatResponse`] that guardrails validate.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use super::{ChatRequest, ChatResponse, ModelError};
use crate::error::Result;

/// One item of a streamed model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// An incremental piece of text.
    Partial(String),
    /// The complete response, sent once at the end.
    Complete(ChatResponse),
}

/// Stream of response chunks.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// A chat model that streams its response.
#[async_trait]
pub trait StreamingChatModel: Send + Sync {
    /// Start a streamed response for the request.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream>;
}

/// A shared, reference-counted streaming chat model.
pub type SharedStreamingChatModel = Arc<dyn StreamingChatModel>;

/// Buffers the chunks of a single streamed attempt.
#[derive(Debug, Clone, Default)]
pub struct ResponseAccumulator {
    partials: Vec<String>,
    complete: Option<ChatResponse>,
}

impl ResponseAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            partials: Vec::new(),
            complete: None,
        }
    }

    /// Record a chunk.
    pub fn push(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Partial(text) => self.partials.push(text),
            StreamChunk::Complete(response) => self.complete = Some(response),
        }
    }

    /// Partial chunks received so far, in arrival order.
    #[must_use]
    pub fn partials(&self) -> &[String] {
        &self.partials
    }

    /// Text assembled from the partial chunks so far.
    #[must_use]
    pub fn text(&self) -> String {
        self.partials.concat()
    }

    /// Drain a whole stream into a new accumulator.
    ///
    /// # Errors
    ///
    /// Returns the first error item produced by the stream.
    pub async fn collect(mut stream: ChatStream) -> Result<Self> {
        let mut acc = Self::new();
        while let Some(chunk) = stream.next().await {
            acc.push(chunk?);
        }
        Ok(acc)
    }

    /// Finish the attempt, returning the buffered partials and the assembled response.
    ///
    /// The provider's complete response wins when present; otherwise the
    /// partials are concatenated into an assistant message.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::EmptyResponse`] if the stream ended without
    /// any chunk.
    pub fn finish(self) -> Result<(Vec<String>, ChatResponse)> {
        let response = match self.complete {
            Some(response) => response,
            None if !self.partials.is_empty() => ChatResponse::new(self.partials.concat()),
            None => return Err(ModelError::EmptyResponse.into()),
        };
        Ok((self.partials, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn stream_of(chunks: Vec<Result<StreamChunk>>) -> ChatStream {
        Box::pin(futures::stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_collect_prefers_complete_response() {
        let stream = stream_of(vec![
            Ok(StreamChunk::Partial("Hel".into())),
            Ok(StreamChunk::Partial("lo".into())),
            Ok(StreamChunk::Complete(ChatResponse::new("Hello!"))),
        ]);

        let acc = ResponseAccumulator::collect(stream).await.unwrap();
        assert_eq!(acc.text(), "Hello");
        let (partials, response) = acc.finish().unwrap();
        assert_eq!(partials, vec!["Hel", "lo"]);
        assert_eq!(response.text(), "Hello!");
    }

    #[tokio::test]
    async fn test_finish_from_partials_only() {
        let stream = stream_of(vec![
            Ok(StreamChunk::Partial("a".into())),
            Ok(StreamChunk::Partial("b".into())),
        ]);
        let (_, response) = ResponseAccumulator::collect(stream)
            .await
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(response.text(), "ab");
    }

    #[tokio::test]
    async fn test_collect_stops_on_error() {
        let stream = stream_of(vec![
            Ok(StreamChunk::Partial("a".into())),
            Err(ModelError::stream("connection reset").into()),
            Ok(StreamChunk::Partial("never".into())),
        ]);
        let err = ResponseAccumulator::collect(stream).await.unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::Stream(_))));
    }

    #[test]
    fn test_empty_stream_is_an_error() {
        let err = ResponseAccumulator::new().finish().unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::EmptyResponse)));
    }
}
