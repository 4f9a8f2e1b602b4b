use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{ModelReply, ModelRequest, Provider, Usage};
use super::configs::ResponsesProviderConfig;
use super::errors::ProviderError;
use super::utils::{data_url, function_call_to_content, request_wire_parts, send_json};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::Tool;

/// Adapter for the Responses API, which can chain replies server side.
///
/// When the request carries a continuation, only the turns after the covered
/// prefix are sent, along with `previous_response_id`.
pub struct ResponsesProvider {
    client: Client,
    config: ResponsesProviderConfig,
}

impl ResponsesProvider {
    pub fn new(config: ResponsesProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        let host = self.config.host.trim_end_matches('/');
        match &self.config.api_version {
            Some(version) => format!("{}/openai/responses?api-version={}", host, version),
            None => format!("{}/v1/responses", host),
        }
    }

    async fn post(&self, payload: Value) -> Result<Value, ProviderError> {
        let request = self.client.post(self.url()).json(&payload);
        let request = if self.config.api_version.is_some() {
            request.header("api-key", &self.config.api_key)
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        };
        send_json(request).await
    }

    fn get_usage(data: &Value) -> Usage {
        let usage = &data["usage"];
        let read = |key: &str| usage.get(key).and_then(|v| v.as_i64()).map(|v| v as i32);
        Usage::new(
            read("input_tokens"),
            read("output_tokens"),
            read("total_tokens"),
        )
    }
}

pub fn messages_to_responses_input(messages: &[Message]) -> Vec<Value> {
    let mut items = Vec::new();

    for message in messages {
        match message.role {
            Role::User => {
                let parts: Vec<Value> = message
                    .content
                    .iter()
                    .filter_map(|content| match content {
                        MessageContent::Text(text) => {
                            Some(json!({"type": "input_text", "text": text.text}))
                        }
                        MessageContent::Image(image) => Some(json!({
                            "type": "input_image",
                            "image_url": data_url(&image.mime_type, &image.data),
                        })),
                        MessageContent::File(file) => Some(json!({
                            "type": "input_text",
                            "text": format!("[{}]({}) ({})", file.name, file.uri, file.mime_type),
                        })),
                        _ => None,
                    })
                    .collect();
                if !parts.is_empty() {
                    items.push(json!({"role": "user", "content": parts}));
                }
            }
            Role::Assistant => {
                let text = message.text();
                if !text.is_empty() {
                    items.push(json!({"role": "assistant", "content": text}));
                }
                for request in message.tool_requests() {
                    let (name, arguments) = request_wire_parts(&request.tool_call);
                    items.push(json!({
                        "type": "function_call",
                        "call_id": request.id,
                        "name": name,
                        "arguments": arguments,
                    }));
                }
            }
            Role::Tool => {
                for content in &message.content {
                    if let MessageContent::ToolResponse(response) = content {
                        items.push(json!({
                            "type": "function_call_output",
                            "call_id": response.id,
                            "output": response.output,
                        }));
                    }
                }
            }
        }
    }

    items
}

pub fn tools_to_responses_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            })
        })
        .collect()
}

pub fn response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let output = response
        .get("output")
        .and_then(|o| o.as_array())
        .ok_or_else(|| ProviderError::MalformedReply("reply has no output".to_string()))?;

    let mut message = Message::assistant();
    for item in output {
        match item["type"].as_str() {
            Some("message") => {
                let parts = item["content"].as_array().cloned().unwrap_or_default();
                for part in parts {
                    if let Some(text) = part["text"].as_str() {
                        if !text.is_empty() {
                            message = message.with_text(text);
                        }
                    }
                }
            }
            Some("function_call") => {
                let id = item["call_id"].as_str().unwrap_or_default().to_string();
                let name = item["name"].as_str().unwrap_or_default();
                let arguments = item["arguments"].as_str().unwrap_or_default();
                message = message.with_content(function_call_to_content(id, name, arguments));
            }
            // reasoning items and the like carry nothing for the conversation
            _ => {}
        }
    }

    if message.content.is_empty() {
        return Err(ProviderError::MalformedReply(
            "reply has no message text or function calls".to_string(),
        ));
    }

    Ok(message)
}

#[async_trait]
impl Provider for ResponsesProvider {
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelReply, ProviderError> {
        let mut payload = json!({
            "model": self.config.model,
            "instructions": request.system,
            "input": messages_to_responses_input(request.unsent_messages()),
            "temperature": request.temperature,
        });

        if let Some(continuation) = request.continuation {
            if continuation.covered <= request.messages.len() {
                payload["previous_response_id"] = json!(continuation.token);
            }
        }
        if !request.tools.is_empty() {
            payload["tools"] = json!(tools_to_responses_spec(request.tools));
        }
        if let Some(tokens) = self.config.max_tokens {
            payload["max_output_tokens"] = json!(tokens);
        }

        let response = self.post(payload).await?;
        let message = response_to_message(&response)?;
        let usage = Self::get_usage(&response);

        let mut reply = ModelReply::new(message, usage);
        reply.continuation = response["id"].as_str().map(str::to_string);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::Continuation;
    use crate::models::tool::ToolCall;
    use anyhow::Result;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(host: String, api_version: Option<&str>) -> ResponsesProviderConfig {
        ResponsesProviderConfig {
            host,
            api_key: "test_key".to_string(),
            model: "gpt-4.1".to_string(),
            max_tokens: Some(1024),
            api_version: api_version.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_azure_style_request() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/responses"))
            .and(query_param("api-version", "2025-03-01-preview"))
            .and(header("api-key", "test_key"))
            .and(body_partial_json(json!({"instructions": "sys", "max_output_tokens": 1024})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "resp_1",
                "output": [{
                    "type": "message",
                    "content": [{"type": "output_text", "text": "Hola"}]
                }],
                "usage": {"input_tokens": 5, "output_tokens": 1, "total_tokens": 6}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider =
            ResponsesProvider::new(config(mock_server.uri(), Some("2025-03-01-preview")))?;
        let messages = vec![Message::user().with_text("hola")];
        let reply = provider
            .complete(&ModelRequest::new("sys", &messages, &[]))
            .await?;

        assert_eq!(reply.message.text(), "Hola");
        assert_eq!(reply.continuation.as_deref(), Some("resp_1"));
        assert_eq!(reply.usage, Usage::new(Some(5), Some(1), Some(6)));
        Ok(())
    }

    #[tokio::test]
    async fn test_continuation_sends_only_new_turns() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("Authorization", "Bearer test_key"))
            .and(body_partial_json(json!({
                "previous_response_id": "resp_1",
                "input": [{"type": "function_call_output", "call_id": "c1", "output": "4"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "resp_2",
                "output": [{
                    "type": "message",
                    "content": [{"type": "output_text", "text": "2 + 2 = 4"}]
                }]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = ResponsesProvider::new(config(mock_server.uri(), None))?;
        let messages = vec![
            Message::user().with_text("calcula 2+2"),
            Message::assistant().with_tool_request(
                "c1",
                Ok(ToolCall::new("solve_math", json!({"problem_statement": "2+2"}))),
            ),
            Message::tool().with_tool_response("c1", "solve_math", "4"),
        ];
        let continuation = Continuation {
            token: "resp_1".to_string(),
            covered: 2,
        };
        let request =
            ModelRequest::new("sys", &messages, &[]).with_continuation(Some(&continuation));
        let reply = provider.complete(&request).await?;

        assert_eq!(reply.message.text(), "2 + 2 = 4");
        assert_eq!(reply.continuation.as_deref(), Some("resp_2"));
        Ok(())
    }

    #[test]
    fn test_function_call_items_parse() {
        let response = json!({
            "id": "resp_3",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "function_call", "call_id": "c9", "name": "internet_search", "arguments": "{\"query\":\"pi\"}"}
            ]
        });
        let message = response_to_message(&response).unwrap();
        let requests = message.tool_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "c9");
        assert_eq!(requests[0].name(), "internet_search");
    }

    #[test]
    fn test_missing_output_is_malformed() {
        let result = response_to_message(&json!({"id": "resp_4"}));
        assert!(matches!(result, Err(ProviderError::MalformedReply(_))));

        let reasoning_only = json!({"id": "resp_5", "output": [{"type": "reasoning", "summary": []}]});
        assert!(matches!(
            response_to_message(&reasoning_only),
            Err(ProviderError::MalformedReply(_))
        ));
    }
}
