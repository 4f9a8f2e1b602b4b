use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use super::{System, ToolContext};
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::{Tool, ToolCall};

pub const BING_DEFAULT_HOST: &str = "https://api.bing.microsoft.com";
pub const DEFAULT_RESULT_COUNT: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub host: String,
    pub api_key: String,
    pub count: u32,
}

impl SearchConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: BING_DEFAULT_HOST.to_string(),
            api_key: api_key.into(),
            count: DEFAULT_RESULT_COUNT,
        }
    }
}

/// `internet_search`, backed by a Bing Web Search v7 style endpoint.
///
/// Failures are reported inside the JSON result rather than as errors, so the
/// model always gets something it can cite or work around.
pub struct SearchSystem {
    tools: Vec<Tool>,
    client: Client,
    config: SearchConfig,
}

impl SearchSystem {
    pub fn new(config: SearchConfig) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AgentError::Internal(e.to_string()))?;

        let internet_search = Tool::new(
            "internet_search",
            "Search the internet. Returns markdown links with a snippet each.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query."
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        );

        Ok(Self {
            tools: vec![internet_search],
            client,
            config,
        })
    }

    async fn fetch(&self, query: &str) -> Result<Vec<String>, String> {
        let url = format!("{}/v7.0/search", self.config.host.trim_end_matches('/'));
        let count = self.config.count.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("count", count.as_str())])
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("search failed with status {}: {}", status, body));
        }

        let data: Value = response.json().await.map_err(|e| e.to_string())?;
        let pages = data["webPages"]["value"].as_array().cloned().unwrap_or_default();
        Ok(pages
            .iter()
            .filter_map(|page| {
                let title = page["name"].as_str()?;
                let url = page["url"].as_str()?;
                let snippet = page["snippet"].as_str().unwrap_or_default();
                Some(format!("[{}]({}): {}", title, url, snippet))
            })
            .collect())
    }

    pub async fn internet_search(&self, query: &str) -> String {
        match self.fetch(query).await {
            Ok(results) => json!({"results": results}).to_string(),
            Err(error) => {
                warn!(query, error = %error, "internet search failed");
                json!({"error": error}).to_string()
            }
        }
    }
}

#[async_trait]
impl System for SearchSystem {
    fn name(&self) -> &str {
        "SearchSystem"
    }

    fn description(&self) -> &str {
        "Searches the web"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall, _ctx: &ToolContext<'_>) -> AgentResult<String> {
        match tool_call.name.as_str() {
            "internet_search" => Ok(self.internet_search(tool_call.str_arg("query")?).await),
            _ => Err(AgentError::ToolNotFound(tool_call.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::CollectingOutbox;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn system_for(server: &MockServer) -> SearchSystem {
        SearchSystem::new(SearchConfig {
            host: server.uri(),
            api_key: "bing_key".to_string(),
            count: 2,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_results_are_markdown_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7.0/search"))
            .and(query_param("q", "teorema de pitágoras"))
            .and(query_param("count", "2"))
            .and(header("Ocp-Apim-Subscription-Key", "bing_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "webPages": {"value": [
                    {"name": "Teorema de Pitágoras", "url": "https://es.wikipedia.org/wiki/Teorema_de_Pit%C3%A1goras", "snippet": "En un triángulo rectángulo..."},
                    {"name": "Sin url"}
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let system = system_for(&server).await;
        let outbox = CollectingOutbox::new();
        let output = system
            .call(
                ToolCall::new("internet_search", json!({"query": "teorema de pitágoras"})),
                &ToolContext::new(&outbox),
            )
            .await
            .unwrap();

        let value: Value = serde_json::from_str(&output).unwrap();
        let results = value["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0],
            "[Teorema de Pitágoras](https://es.wikipedia.org/wiki/Teorema_de_Pit%C3%A1goras): En un triángulo rectángulo..."
        );
    }

    #[tokio::test]
    async fn test_failure_is_reported_in_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let system = system_for(&server).await;
        let output = system.internet_search("pi").await;
        let value: Value = serde_json::from_str(&output).unwrap();
        assert!(value["error"].as_str().unwrap().contains("401"));
        assert!(value.get("results").is_none());
    }

    #[tokio::test]
    async fn test_missing_query_is_invalid() {
        let server = MockServer::start().await;
        let system = system_for(&server).await;
        let outbox = CollectingOutbox::new();
        let result = system
            .call(
                ToolCall::new("internet_search", json!({})),
                &ToolContext::new(&outbox),
            )
            .await;
        assert!(matches!(result, Err(AgentError::InvalidParameters(_))));
    }
}
