use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::models::conversation::Continuation;
use crate::models::message::Message;
use crate::providers::base::{ModelReply, ModelRequest, Provider, Usage};
use crate::providers::errors::ProviderError;

/// What a [`MockProvider`] saw on one call
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub continuation: Option<Continuation>,
}

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    steps: Mutex<VecDeque<Result<ModelReply, ProviderError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::from_steps(responses.into_iter().map(Ok).collect())
    }

    /// Script replies and failures in the order they should be returned
    pub fn from_steps(steps: Vec<Result<Message, ProviderError>>) -> Self {
        let steps = steps
            .into_iter()
            .map(|step| step.map(|message| ModelReply::new(message, Usage::default())))
            .collect();
        Self {
            steps: Mutex::new(steps),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply that also hands back a continuation token
    pub fn push_reply_with_continuation<S: Into<String>>(&self, message: Message, token: S) {
        let mut reply = ModelReply::new(message, Usage::default());
        reply.continuation = Some(token.into());
        lock(&self.steps).push_back(Ok(reply));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelReply, ProviderError> {
        lock(&self.requests).push(RecordedRequest {
            system: request.system.to_string(),
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
            continuation: request.continuation.cloned(),
        });

        // Return empty response if no more pre-configured responses
        lock(&self.steps).pop_front().unwrap_or_else(|| {
            Ok(ModelReply::new(
                Message::assistant().with_text(""),
                Usage::default(),
            ))
        })
    }
}
