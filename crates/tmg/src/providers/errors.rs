use thiserror::Error;

/// Failures talking to a model backend
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited by the backend")]
    RateLimited,

    #[error("Server error: {status} - {body}")]
    Server { status: u16, body: String },

    #[error("Request failed: {status} - {body}")]
    Request { status: u16, body: String },

    #[error("Malformed backend reply: {0}")]
    MalformedReply(String),

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Gave up after {attempts} attempts, last error: {last_error}")]
    RetryExceeded { attempts: usize, last_error: String },

    #[error("Invalid provider configuration: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether sending the same request again could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_)
            | ProviderError::RateLimited
            | ProviderError::Server { .. }
            | ProviderError::MalformedReply(_) => true,
            ProviderError::Request { .. }
            | ProviderError::ContextLengthExceeded(_)
            | ProviderError::RetryExceeded { .. }
            | ProviderError::Config(_) => false,
        }
    }
}
