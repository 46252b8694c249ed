use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::{ConfigError, GatewayError, SentMessage, SmsGateway};

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";

/// Credentials and endpoint of the Twilio REST API
#[derive(Clone)]
pub struct TwilioConfig {
    /// Account SID, also the basic auth user
    pub account_sid: String,
    /// Auth token, also the callback signing secret
    pub auth_token: SecretString,
    /// API base URL, overridable for tests
    pub base_url: String,
}

impl TwilioConfig {
    /// Reads `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN` and the optional
    /// `TWILIO_API_BASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let account_sid = env::var("TWILIO_ACCOUNT_SID")
            .map_err(|_| ConfigError::MissingVar("TWILIO_ACCOUNT_SID"))?;

        let auth_token = env::var("TWILIO_AUTH_TOKEN")
            .map_err(|_| ConfigError::MissingVar("TWILIO_AUTH_TOKEN"))?;

        let base_url =
            env::var("TWILIO_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            base_url,
        })
    }
}

/// Successful message resource
#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
    status: String,
}

/// Error body returned on 4xx/5xx
#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// Twilio Programmable Messaging gateway
pub struct TwilioGateway {
    client: Client,
    config: TwilioConfig,
}

impl TwilioGateway {
    /// Create a new Twilio gateway
    pub fn new(config: TwilioConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    async fn send(
        &self,
        to: &str,
        from: &str,
        body: &str,
        status_callback: &str,
    ) -> Result<SentMessage, GatewayError> {
        debug!("Sending SMS to {}", to);

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&[
                ("To", to),
                ("From", from),
                ("Body", body),
                ("StatusCallback", status_callback),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let message: TwilioMessage = response
                .json()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

            return Ok(SentMessage {
                id: message.sid,
                status: message.status,
            });
        }

        let error_text = response.text().await.unwrap_or_default();
        let error_body: Option<TwilioErrorBody> = serde_json::from_str(&error_text).ok();
        warn!("Twilio rejected SMS to {} with status {}", to, status);

        Err(match error_body {
            Some(body) => GatewayError::Rejected {
                code: body.code.map(|c| c.to_string()),
                message: body
                    .message
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            },
            None => GatewayError::Rejected {
                code: None,
                message: format!(
                    "HTTP {} - {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown error")
                ),
            },
        })
    }
}
