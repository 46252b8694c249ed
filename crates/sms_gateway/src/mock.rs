use async_trait::async_trait;
use tracing::info;

use crate::types::{GatewayError, SentMessage, SmsGateway};

/// Mock SMS gateway for development/testing
pub struct MockSmsGateway;

#[async_trait]
impl SmsGateway for MockSmsGateway {
    async fn send(
        &self,
        to: &str,
        from: &str,
        body: &str,
        status_callback: &str,
    ) -> Result<SentMessage, GatewayError> {
        info!("📱 [MOCK SMS] From: {} To: {}", from, to);
        info!("📱 [MOCK SMS] Message: {}", body);
        info!("📱 [MOCK SMS] Status callback: {}", status_callback);

        Ok(SentMessage {
            id: format!("SM{}", uuid::Uuid::new_v4().simple()),
            status: "queued".to_string(),
        })
    }
}
