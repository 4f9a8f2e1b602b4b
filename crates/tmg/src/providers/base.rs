use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::errors::ProviderError;
use crate::models::conversation::Continuation;
use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Everything a backend needs to produce the next assistant turn
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [Tool],
    pub temperature: f32,
    pub continuation: Option<&'a Continuation>,
}

impl<'a> ModelRequest<'a> {
    pub fn new(system: &'a str, messages: &'a [Message], tools: &'a [Tool]) -> Self {
        Self {
            system,
            messages,
            tools,
            temperature: 0.0,
            continuation: None,
        }
    }

    pub fn with_continuation(mut self, continuation: Option<&'a Continuation>) -> Self {
        self.continuation = continuation;
        self
    }

    /// The turns a continuation-aware backend still has to be sent
    pub fn unsent_messages(&self) -> &'a [Message] {
        match self.continuation {
            Some(c) if c.covered <= self.messages.len() => &self.messages[c.covered..],
            _ => self.messages,
        }
    }
}

/// The assistant turn produced by a backend
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub message: Message,
    pub usage: Usage,
    /// Opaque id a follow-up request may reference instead of resending history
    pub continuation: Option<String>,
}

impl ModelReply {
    pub fn new(message: Message, usage: Usage) -> Self {
        Self {
            message,
            usage,
            continuation: None,
        }
    }
}

/// Base trait for AI providers (OpenAI, Gemini, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message for the given conversation
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelReply, ProviderError>;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for std::sync::Arc<P> {
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelReply, ProviderError> {
        self.as_ref().complete(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn test_usage_creation() {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(20));
        assert_eq!(usage.total_tokens, Some(30));
    }

    #[test]
    fn test_usage_serialization() -> Result<()> {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        let serialized = serde_json::to_string(&usage)?;
        let json_value: serde_json::Value = serde_json::from_str(&serialized)?;
        assert_eq!(json_value["input_tokens"], json!(10));
        assert_eq!(json_value["output_tokens"], json!(20));
        assert_eq!(json_value["total_tokens"], json!(30));
        Ok(())
    }

    #[test]
    fn test_unsent_messages() {
        let messages = vec![
            Message::user().with_text("a"),
            Message::assistant().with_text("b"),
            Message::user().with_text("c"),
        ];
        let request = ModelRequest::new("", &messages, &[]);
        assert_eq!(request.unsent_messages().len(), 3);

        let continuation = Continuation {
            token: "resp_1".into(),
            covered: 2,
        };
        let request = request.with_continuation(Some(&continuation));
        assert_eq!(request.unsent_messages().len(), 1);
        assert_eq!(request.unsent_messages()[0].text(), "c");

        // A stale continuation from a longer history falls back to a full send
        let stale = Continuation {
            token: "resp_9".into(),
            covered: 7,
        };
        let request = request.with_continuation(Some(&stale));
        assert_eq!(request.unsent_messages().len(), 3);
    }
}
