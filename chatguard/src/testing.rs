//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::chat::{
    ChatModel, ChatRequest, ChatResponse, ChatStream, ModelError, StreamChunk, StreamingChatModel,
};
use crate::error::Result;
use crate::guardrail::{
    InputGuardrail, InputGuardrailResult, OutputGuardrail, OutputGuardrailCheck,
    OutputGuardrailRequest, OutputGuardrailResult,
};

/// An input guardrail returning `f()` and counting its invocations.
pub fn counting_input<F>(name: &str, f: F) -> (InputGuardrail, Arc<AtomicUsize>)
where
    F: Fn() -> InputGuardrailResult + Send + Sync + 'static,
{
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let guardrail = InputGuardrail::from_fn(name, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        f()
    });
    (guardrail, count)
}

/// An output guardrail that appends `suffix` to the response text.
pub fn append_rewrite(name: &str, suffix: &'static str) -> OutputGuardrail {
    OutputGuardrail::from_fn(name, move |req| {
        OutputGuardrailResult::success_with(format!("{}{suffix}", req.text()))
    })
}

type ResultFn = Box<dyn Fn(usize) -> OutputGuardrailResult + Send + Sync>;

/// An output guardrail counting its invocations.
pub struct CountingOutputGuardrail {
    count: AtomicUsize,
    result: ResultFn,
}

impl CountingOutputGuardrail {
    /// Returns `f()` on every call.
    pub fn new<F>(f: F) -> Arc<Self>
    where
        F: Fn() -> OutputGuardrailResult + Send + Sync + 'static,
    {
        Arc::new(Self {
            count: AtomicUsize::new(0),
            result: Box::new(move |_| f()),
        })
    }

    /// Returns the scripted results in order, repeating the last one.
    pub fn sequence(results: Vec<OutputGuardrailResult>) -> Arc<Self> {
        Arc::new(Self {
            count: AtomicUsize::new(0),
            result: Box::new(move |call| {
                results[call.min(results.len() - 1)].clone()
            }),
        })
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutputGuardrailCheck for CountingOutputGuardrail {
    async fn validate(
        &self,
        _request: &OutputGuardrailRequest<'_>,
    ) -> Result<OutputGuardrailResult> {
        let call = self.count.fetch_add(1, Ordering::SeqCst);
        Ok((self.result)(call))
    }
}

/// A chat model replying with scripted texts, repeating the last one.
#[derive(Debug, Default)]
pub struct ScriptedChatModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        reply.ok_or_else(|| ModelError::request("no scripted reply").into())
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        Ok(ChatResponse::new(self.next_reply(request)?))
    }
}

/// Streams each scripted reply word by word.
#[async_trait]
impl StreamingChatModel for ScriptedChatModel {
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream> {
        let reply = self.next_reply(request)?;
        let chunks: Vec<Result<StreamChunk>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(StreamChunk::Partial(word.to_owned())))
            .chain(std::iter::once(Ok(StreamChunk::Complete(ChatResponse::new(
                reply.clone(),
            )))))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
