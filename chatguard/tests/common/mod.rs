//! Mock models and spy guardrails for the end-to-end tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use chatguard::chat::{
    ChatModel, ChatRequest, ChatResponse, ChatStream, ModelError, StreamChunk, StreamingChatModel,
};
use chatguard::guardrail::{
    InputGuardrail, InputGuardrailResult, OutputGuardrail, OutputGuardrailResult,
};
use chatguard::Result;

/// Replies with scripted texts in order, repeating the last one.
///
/// Streams each reply word by word, followed by the complete response.
#[derive(Debug, Default)]
pub struct MockModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockModel {
    pub fn new<const N: usize>(replies: [&str; N]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| (*r).to_owned()).collect()),
            requests: Mutex::new(Vec::new()),
        })
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
impl ChatModel for MockModel {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        Ok(ChatResponse::new(self.next_reply(request)?))
    }
}

#[async_trait]
impl StreamingChatModel for MockModel {
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream> {
        let reply = self.next_reply(request)?;
        let mut chunks: Vec<Result<StreamChunk>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(StreamChunk::Partial(word.to_owned())))
            .collect();
        chunks.push(Ok(StreamChunk::Complete(ChatResponse::new(reply))));
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Emits one chunk, then never finishes. Records when its stream is dropped.
#[derive(Debug, Default)]
pub struct HangingModel {
    pub dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamingChatModel for HangingModel {
    async fn chat_stream(&self, _request: &ChatRequest) -> Result<ChatStream> {
        let flag = DropFlag(Arc::clone(&self.dropped));
        let stream = futures::stream::iter(vec![Ok(StreamChunk::Partial("thinking".to_owned()))])
            .chain(futures::stream::pending::<Result<StreamChunk>>())
            .map(move |chunk| {
                let _alive = &flag;
                chunk
            });
        Ok(Box::pin(stream))
    }
}

/// An input guardrail recording its name into `log` and returning `result`.
pub fn logging_input(
    name: &'static str,
    log: &Arc<Mutex<Vec<&'static str>>>,
    result: fn() -> InputGuardrailResult,
) -> InputGuardrail {
    let log = Arc::clone(log);
    InputGuardrail::from_fn(name, move |_| {
        log.lock().unwrap().push(name);
        result()
    })
}

/// An output guardrail counting its invocations.
pub fn counting_output<F>(name: &str, f: F) -> (OutputGuardrail, Arc<AtomicUsize>)
where
    F: Fn(&str) -> OutputGuardrailResult + Send + Sync + 'static,
{
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let guardrail = OutputGuardrail::from_fn(name, move |req| {
        seen.fetch_add(1, Ordering::SeqCst);
        f(req.text())
    });
    (guardrail, count)
}

/// An output guardrail that appends `suffix` to the response.
pub fn append(name: &str, suffix: &'static str) -> OutputGuardrail {
    OutputGuardrail::from_fn(name, move |req| {
        OutputGuardrailResult::success_with(format!("{}{suffix}", req.text()))
    })
}
