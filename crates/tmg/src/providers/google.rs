use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::base::{ModelReply, ModelRequest, Provider, Usage};
use super::configs::GoogleProviderConfig;
use super::errors::ProviderError;
use super::utils::{is_valid_function_name, send_json};
use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

/// Adapter for Gemini `generateContent`.
///
/// Gemini has no call ids, so ids are synthesized on the way in and dropped on
/// the way out; results are matched to calls by position and name.
pub struct GoogleProvider {
    client: Client,
    config: GoogleProviderConfig,
}

impl GoogleProvider {
    pub fn new(config: GoogleProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.host.trim_end_matches('/'),
            self.config.model
        )
    }

    fn get_usage(data: &Value) -> Usage {
        let meta = &data["usageMetadata"];
        let read = |key: &str| meta.get(key).and_then(|v| v.as_i64()).map(|v| v as i32);
        Usage::new(
            read("promptTokenCount"),
            read("candidatesTokenCount"),
            read("totalTokenCount"),
        )
    }
}

/// Gemini rejects `additionalProperties` anywhere in a function schema
pub fn strip_additional_properties(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| key.as_str() != "additionalProperties")
                .map(|(key, value)| (key.clone(), strip_additional_properties(value)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_additional_properties).collect()),
        other => other.clone(),
    }
}

pub fn tools_to_google_spec(tools: &[Tool]) -> Value {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": strip_additional_properties(&tool.parameters),
            })
        })
        .collect();
    json!([{ "functionDeclarations": declarations }])
}

fn tool_turn_parts(message: &Message) -> Vec<Value> {
    message
        .content
        .iter()
        .filter_map(|content| content.as_tool_response())
        .map(|response| {
            if response.name.is_empty() {
                // answer to a call that never reached the wire
                json!({"text": response.output})
            } else {
                json!({
                    "functionResponse": {
                        "name": response.name,
                        "response": {"content": response.output},
                    }
                })
            }
        })
        .collect()
}

pub fn messages_to_google_spec(messages: &[Message]) -> Vec<Value> {
    let mut contents: Vec<Value> = Vec::new();
    let mut previous_role: Option<Role> = None;

    for message in messages {
        match message.role {
            Role::Tool => {
                let parts = tool_turn_parts(message);
                let merge = previous_role == Some(Role::Tool);
                match contents.last_mut() {
                    Some(last) if merge => {
                        if let Some(existing) = last["parts"].as_array_mut() {
                            existing.extend(parts);
                        }
                    }
                    _ => contents.push(json!({"role": "user", "parts": parts})),
                }
            }
            Role::User => {
                let parts: Vec<Value> = message
                    .content
                    .iter()
                    .filter_map(|content| match content {
                        MessageContent::Text(text) => Some(json!({"text": text.text})),
                        MessageContent::Image(image) => Some(json!({
                            "inlineData": {"mimeType": image.mime_type, "data": image.data}
                        })),
                        MessageContent::File(file) => Some(json!({
                            "fileData": {"mimeType": file.mime_type, "fileUri": file.uri}
                        })),
                        _ => None,
                    })
                    .collect();
                contents.push(json!({"role": "user", "parts": parts}));
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                for content in &message.content {
                    match content {
                        MessageContent::Text(text) if !text.text.is_empty() => {
                            parts.push(json!({"text": text.text}));
                        }
                        MessageContent::ToolRequest(request) => {
                            if let Ok(call) = &request.tool_call {
                                parts.push(json!({
                                    "functionCall": {"name": call.name, "args": call.arguments}
                                }));
                            }
                        }
                        _ => {}
                    }
                }
                if parts.is_empty() {
                    parts.push(json!({"text": ""}));
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
        }
        previous_role = Some(message.role);
    }

    contents
}

pub fn google_response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let candidate = response
        .get("candidates")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::MalformedReply("reply has no candidates".to_string()))?;

    let mut message = Message::assistant();
    let parts = candidate["content"]["parts"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    for part in parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            if !text.is_empty() {
                message = message.with_text(text);
            }
        } else if let Some(call) = part.get("functionCall") {
            let id = Uuid::new_v4().to_string();
            let name = call["name"].as_str().unwrap_or_default();
            let tool_call = if is_valid_function_name(name) {
                let args = match call.get("args") {
                    Some(Value::Object(args)) => Value::Object(args.clone()),
                    _ => json!({}),
                };
                Ok(ToolCall::new(name, args))
            } else {
                Err(AgentError::ToolNotFound(name.to_string()))
            };
            message = message.with_tool_request(id, tool_call);
        }
    }

    // safety blocks and MAX_TOKENS stops come back without usable parts
    if message.content.is_empty() {
        let reason = candidate["finishReason"].as_str().unwrap_or("unknown");
        return Err(ProviderError::MalformedReply(format!(
            "candidate has no text or function calls (finish reason: {})",
            reason
        )));
    }

    Ok(message)
}

#[async_trait]
impl Provider for GoogleProvider {
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelReply, ProviderError> {
        let mut generation_config = json!({"temperature": request.temperature});
        if let Some(tokens) = self.config.max_tokens {
            generation_config["maxOutputTokens"] = json!(tokens);
        }

        let mut payload = json!({
            "contents": messages_to_google_spec(request.messages),
            "generationConfig": generation_config,
        });
        if !request.system.is_empty() {
            payload["systemInstruction"] = json!({"parts": [{"text": request.system}]});
        }
        if !request.tools.is_empty() {
            payload["tools"] = tools_to_google_spec(request.tools);
        }

        debug!(model = %self.config.model, "Gemini request");
        let http_request = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&payload);
        let response = send_json(http_request).await?;

        let message = google_response_to_message(&response)?;
        Ok(ModelReply::new(message, Self::get_usage(&response)))
    }
}
