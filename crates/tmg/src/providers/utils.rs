use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use super::errors::ProviderError;
use crate::errors::AgentError;
use crate::models::message::MessageContent;
use crate::models::tool::ToolCall;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Name sent in place of a tool request that could not be parsed, keeping call ids paired
pub const INVALID_CALL_NAME: &str = "invalid_function_call";

/// Send a prepared request and map the HTTP outcome onto provider errors
pub async fn send_json(request: RequestBuilder) -> Result<Value, ProviderError> {
    let response = request.send().await?;
    let status = response.status();

    match status {
        StatusCode::OK => response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedReply(e.to_string())),
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
        status if status.is_server_error() => Err(ProviderError::Server {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        }),
        status => {
            let body = response.text().await.unwrap_or_default();
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                if let Some(err) = check_context_length_error(&value["error"]) {
                    return Err(err);
                }
            }
            Err(ProviderError::Request {
                status: status.as_u16(),
                body,
            })
        }
    }
}

pub fn check_context_length_error(error: &Value) -> Option<ProviderError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ProviderError::ContextLengthExceeded(message))
    } else {
        None
    }
}

pub fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

pub fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

/// Turn a wire-level function call (arguments as a JSON string) into a tool request
pub fn function_call_to_content(id: String, name: &str, arguments: &str) -> MessageContent {
    if !is_valid_function_name(name) {
        let error = AgentError::ToolNotFound(format!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            name
        ));
        return MessageContent::tool_request(id, Err(error));
    }

    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    match serde_json::from_str::<Value>(arguments) {
        Ok(params) => MessageContent::tool_request(id, Ok(ToolCall::new(name, params))),
        Err(e) => {
            let error = AgentError::InvalidParameters(format!(
                "Could not interpret tool use parameters for id {}: {}",
                id, e
            ));
            MessageContent::tool_request(id, Err(error))
        }
    }
}

/// Name and serialized arguments for a tool request, using a placeholder for failed parses
pub fn request_wire_parts(tool_call: &Result<ToolCall, AgentError>) -> (String, String) {
    match tool_call {
        Ok(call) => (
            sanitize_function_name(&call.name),
            call.arguments.to_string(),
        ),
        Err(_) => (INVALID_CALL_NAME.to_string(), "{}".to_string()),
    }
}

pub fn data_url(mime_type: &str, data: &str) -> String {
    format!("data:{};base64,{}", mime_type, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("hello-world"), "hello-world");
        assert_eq!(sanitize_function_name("hello world"), "hello_world");
        assert_eq!(sanitize_function_name("hello@world"), "hello_world");
    }

    #[test]
    fn test_is_valid_function_name() {
        assert!(is_valid_function_name("hello-world"));
        assert!(is_valid_function_name("hello_world"));
        assert!(!is_valid_function_name("hello world"));
        assert!(!is_valid_function_name("hello@world"));
    }

    #[test]
    fn test_function_call_to_content() {
        let content = function_call_to_content("1".into(), "solve_math", r#"{"problem_statement": "2+2"}"#);
        let request = content.as_tool_request().unwrap();
        let call = request.tool_call.as_ref().unwrap();
        assert_eq!(call.name, "solve_math");
        assert_eq!(call.arguments, json!({"problem_statement": "2+2"}));

        let content = function_call_to_content("2".into(), "solve_math", "{not json");
        let request = content.as_tool_request().unwrap();
        assert!(matches!(
            request.tool_call,
            Err(AgentError::InvalidParameters(_))
        ));

        let content = function_call_to_content("3".into(), "bad name", "{}");
        let request = content.as_tool_request().unwrap();
        assert!(matches!(request.tool_call, Err(AgentError::ToolNotFound(_))));

        let content = function_call_to_content("4".into(), "finish", "");
        let call = content.as_tool_request().unwrap().tool_call.clone().unwrap();
        assert_eq!(call.arguments, json!({}));
    }

    #[test]
    fn test_check_context_length_error() {
        let error = json!({"code": "context_length_exceeded", "message": "too long"});
        assert!(matches!(
            check_context_length_error(&error),
            Some(ProviderError::ContextLengthExceeded(m)) if m == "too long"
        ));
        assert!(check_context_length_error(&json!({"code": "other"})).is_none());
    }

    #[test]
    fn test_request_wire_parts() {
        let ok = Ok(ToolCall::new("internet_search", json!({"query": "x"})));
        assert_eq!(
            request_wire_parts(&ok),
            ("internet_search".to_string(), r#"{"query":"x"}"#.to_string())
        );
        let err = Err(AgentError::InvalidParameters("bad".into()));
        assert_eq!(request_wire_parts(&err).0, INVALID_CALL_NAME);
    }
}
