use async_trait::async_trait;
use serde::Deserialize;

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SentMessage {
    /// Provider-assigned message id, echoed back in status callbacks
    pub id: String,
    /// Initial provider status, e.g. `queued` or `accepted`
    pub status: String,
}

/// Errors returned by an SMS gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The provider refused the message.
    #[error("SMS rejected by provider: {message}")]
    Rejected {
        /// Provider error code, when one was returned
        code: Option<String>,
        /// Provider error message
        message: String,
    },

    /// The request never produced a provider answer.
    #[error("SMS transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with something we could not interpret.
    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Provider error code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            GatewayError::Rejected { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Errors raised while reading gateway configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("{0} environment variable not set")]
    MissingVar(&'static str),
}

/// Trait for SMS gateway implementations
#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// Hands one message to the provider. `status_callback` is the URL the
    /// provider will POST delivery updates to.
    async fn send(
        &self,
        to: &str,
        from: &str,
        body: &str,
        status_callback: &str,
    ) -> Result<SentMessage, GatewayError>;
}
