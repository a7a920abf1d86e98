//! Deterministic model that replays canned replies.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::ChatModel;
use super::error::LlmError;
use super::types::{AssistantReply, ChatRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`ChatModel`] that answers from a fixed script.
///
/// Replies are returned in order. Once the script runs out the repeat
/// reply is returned if one was set; otherwise the call fails. Every
/// request is recorded for inspection.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<AssistantReply>>,
    repeat: Option<AssistantReply>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    /// Create a model that plays `replies` in order.
    pub fn new(replies: impl IntoIterator<Item = AssistantReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a model that always answers with `reply`.
    pub fn repeating(reply: AssistantReply) -> Self {
        Self::new(Vec::new()).with_repeat(reply)
    }

    /// Reply used once the script is exhausted.
    #[must_use]
    pub fn with_repeat(mut self, reply: AssistantReply) -> Self {
        self.repeat = Some(reply);
        self
    }

    /// Number of requests received.
    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, request: ChatRequest) -> Result<AssistantReply, LlmError> {
        lock(&self.requests).push(request);
        lock(&self.replies)
            .pop_front()
            .or_else(|| self.repeat.clone())
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::llm::Message;

    fn request() -> ChatRequest {
        ChatRequest::new("test", vec![Message::user("hi")], None)
    }

    #[tokio::test]
    async fn test_replays_in_order_then_fails() {
        let model = ScriptedModel::new([AssistantReply::text("one"), AssistantReply::text("two")]);

        assert_eq!(
            model.chat(request()).await.unwrap().text_content().as_deref(),
            Some("one")
        );
        assert_eq!(
            model.chat(request()).await.unwrap().text_content().as_deref(),
            Some("two")
        );
        assert!(model.chat(request()).await.is_err());
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_repeating() {
        let model = ScriptedModel::repeating(AssistantReply::text("again"));
        for _ in 0..3 {
            assert!(model.chat(request()).await.is_ok());
        }
    }
}
