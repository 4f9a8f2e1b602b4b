use serde::{Deserialize, Serialize};

pub const OPENAI_DEFAULT_HOST: &str = "https://api.openai.com";
pub const GOOGLE_DEFAULT_HOST: &str = "https://generativelanguage.googleapis.com";

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Responses(ResponsesProviderConfig),
    Google(GoogleProviderConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: Option<i32>,
}

/// Responses API, either on api.openai.com or an Azure resource.
///
/// Setting `api_version` selects the Azure style: `api-key` header and
/// `{host}/openai/responses?api-version=..`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: Option<i32>,
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: Option<i32>,
}

impl ProviderConfig {
    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::OpenAi(c) => &c.model,
            ProviderConfig::Responses(c) => &c.model,
            ProviderConfig::Google(c) => &c.model,
        }
    }
}
