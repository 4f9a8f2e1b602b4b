use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

use super::base::{ModelReply, ModelRequest, Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::errors::ProviderError;
use super::utils::{
    check_context_length_error, data_url, function_call_to_content, request_wire_parts, send_json,
};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::Tool;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let usage = &data["usage"];

        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let total_tokens = usage
            .get("total_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .or_else(|| match (input_tokens, output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    async fn post(&self, payload: Value) -> Result<Value, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload);
        send_json(request).await
    }
}

/// Convert internal messages to the Chat Completions message list
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut spec = Vec::new();

    for message in messages {
        match message.role {
            Role::Tool => {
                for content in &message.content {
                    if let MessageContent::ToolResponse(response) = content {
                        spec.push(json!({
                            "role": "tool",
                            "tool_call_id": response.id,
                            "content": response.output,
                        }));
                    }
                }
            }
            Role::Assistant => {
                let mut converted = json!({"role": "assistant"});
                let text = message.text();
                if !text.is_empty() {
                    converted["content"] = json!(text);
                }
                let tool_calls: Vec<Value> = message
                    .tool_requests()
                    .into_iter()
                    .map(|request| {
                        let (name, arguments) = request_wire_parts(&request.tool_call);
                        json!({
                            "id": request.id,
                            "type": "function",
                            "function": {"name": name, "arguments": arguments},
                        })
                    })
                    .collect();
                if !tool_calls.is_empty() {
                    converted["tool_calls"] = json!(tool_calls);
                }
                if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
                    spec.push(converted);
                }
            }
            Role::User => {
                let parts: Vec<Value> = message
                    .content
                    .iter()
                    .filter_map(|content| match content {
                        MessageContent::Text(text) => {
                            Some(json!({"type": "text", "text": text.text}))
                        }
                        MessageContent::Image(image) => Some(json!({
                            "type": "image_url",
                            "image_url": {"url": data_url(&image.mime_type, &image.data)},
                        })),
                        MessageContent::File(file) => Some(json!({
                            "type": "text",
                            "text": format!("[{}]({}) ({})", file.name, file.uri, file.mime_type),
                        })),
                        _ => None,
                    })
                    .collect();
                if !parts.is_empty() {
                    spec.push(json!({"role": "user", "content": parts}));
                }
            }
        }
    }

    spec
}

/// Convert internal tools to the Chat Completions tool list
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>, ProviderError> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::Config(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

/// Convert a Chat Completions reply into an assistant message
pub fn openai_response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let original = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ProviderError::MalformedReply("reply has no choices".to_string()))?;

    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(|t| t.as_str()) {
        if !text.is_empty() {
            message = message.with_text(text);
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let name = tool_call["function"]["name"].as_str().unwrap_or_default();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();
            message = message.with_content(function_call_to_content(id, name, arguments));
        }
    }

    if message.content.is_empty() {
        return Err(ProviderError::MalformedReply(
            "reply has neither content nor tool calls".to_string(),
        ));
    }

    Ok(message)
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelReply, ProviderError> {
        let mut messages_array = vec![json!({
            "role": "system",
            "content": request.system,
        })];
        messages_array.extend(messages_to_openai_spec(request.messages));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array,
            "temperature": request.temperature,
        });

        let tools_spec = tools_to_openai_spec(request.tools)?;
        if !tools_spec.is_empty() {
            payload["tools"] = json!(tools_spec);
        }
        if let Some(tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(tokens);
        }

        let response = self.post(payload).await?;

        // Some compatible servers report failures with a 200 and an error body
        if let Some(error) = response.get("error") {
            if let Some(err) = check_context_length_error(error) {
                return Err(err);
            }
            return Err(ProviderError::Request {
                status: 200,
                body: error.to_string(),
            });
        }

        let message = openai_response_to_message(&response)?;
        let usage = Self::get_usage(&response);

        Ok(ModelReply::new(message, usage))
    }
}
