use std::time::Duration;
use strum_macros::{Display, EnumIter, EnumString};

use super::{
    base::Provider, configs::ProviderConfig, errors::ProviderError, google::GoogleProvider,
    openai::OpenAiProvider, rate_limit::RateLimitedProvider, responses::ResponsesProvider,
    retry::{RetryConfig, RetryingProvider},
};

#[derive(EnumIter, EnumString, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderType {
    OpenAi,
    Responses,
    Google,
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderConfig::OpenAi(_) => ProviderType::OpenAi,
            ProviderConfig::Responses(_) => ProviderType::Responses,
            ProviderConfig::Google(_) => ProviderType::Google,
        }
    }
}

pub fn get_provider(config: ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Box::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::Responses(responses_config) => {
            Ok(Box::new(ResponsesProvider::new(responses_config)?))
        }
        ProviderConfig::Google(google_config) => Ok(Box::new(GoogleProvider::new(google_config)?)),
    }
}

/// Build the adapter wrapped for production use: every attempt, retries
/// included, passes through the rate limiter.
pub fn get_resilient_provider(
    config: ProviderConfig,
    retry: RetryConfig,
    min_interval: Duration,
) -> Result<Box<dyn Provider>, ProviderError> {
    let adapter = get_provider(config)?;
    let limited = RateLimitedProvider::new(adapter, min_interval);
    Ok(Box::new(RetryingProvider::new(Box::new(limited), retry)))
}
