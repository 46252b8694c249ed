use std::sync::Arc;

use job_store::JobStore;
use secrecy::SecretString;
use sms_dispatch::{
    AdmissionController, DeliveryCorrelator, DispatchConfig, DispatchEngine, DispatchQueue,
};
use sms_gateway::{
    ConfigError, GatewayError, MockSmsGateway, SmsGateway, TwilioConfig, TwilioGateway,
};
use tokio::task::JoinHandle;

/// Errors raised while assembling the dispatch system
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Required configuration is missing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The gateway client could not be built
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// `SMS_GATEWAY` names an unknown gateway
    #[error("Unknown SMS_GATEWAY '{0}', expected 'twilio' or 'mock'")]
    UnknownGateway(String),
}

/// Manager for the dispatch system
/// Wires store, gateway and engine together and hosts the background queue
pub struct DispatchManager {
    admission: Arc<AdmissionController>,
    correlator: Arc<DeliveryCorrelator>,
    queue_handle: Option<JoinHandle<()>>,
}

impl DispatchManager {
    /// Builds every component and starts the dispatch queue.
    ///
    /// `SMS_GATEWAY=mock` logs messages instead of sending them. The mock
    /// gateway still needs a callback secret, read from `TWILIO_AUTH_TOKEN`
    /// when present.
    pub fn start(store: Arc<dyn JobStore>) -> Result<Self, SetupError> {
        log::info!("Starting SMS dispatch system");

        let dispatch_config = DispatchConfig::from_env()?;
        let gateway_kind = std::env::var("SMS_GATEWAY").unwrap_or_else(|_| "twilio".to_string());

        let (gateway, callback_secret): (Arc<dyn SmsGateway>, SecretString) =
            match gateway_kind.as_str() {
                "twilio" => {
                    let config = TwilioConfig::from_env()?;
                    let secret = config.auth_token.clone();
                    log::info!("📱 Using Twilio gateway for account {}", config.account_sid);
                    (Arc::new(TwilioGateway::new(config)?), secret)
                }
                "mock" => {
                    log::warn!("📱 Using mock SMS gateway, no messages will be sent");
                    let secret = std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_default();
                    (Arc::new(MockSmsGateway), SecretString::from(secret))
                }
                other => return Err(SetupError::UnknownGateway(other.to_string())),
            };

        let correlator = Arc::new(DeliveryCorrelator::new(
            store.clone(),
            dispatch_config.status_callback_url.clone(),
            callback_secret,
        ));

        let engine = Arc::new(DispatchEngine::new(store.clone(), gateway, dispatch_config));
        let (queue, notifier) = DispatchQueue::new(store.clone(), engine, None);

        let admission = Arc::new(AdmissionController::new(store, None).with_notifier(notifier));

        let queue_handle = tokio::spawn(queue.run());

        log::info!("SMS dispatch system started successfully");
        Ok(Self {
            admission,
            correlator,
            queue_handle: Some(queue_handle),
        })
    }

    /// Admission controller shared with the HTTP handlers
    pub fn admission(&self) -> Arc<AdmissionController> {
        self.admission.clone()
    }

    /// Callback correlator shared with the HTTP handlers
    pub fn correlator(&self) -> Arc<DeliveryCorrelator> {
        self.correlator.clone()
    }

    /// Stop the dispatch queue
    pub async fn stop(&mut self) {
        log::info!("Stopping SMS dispatch system");

        if let Some(handle) = self.queue_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        log::info!("SMS dispatch system stopped");
    }
}

impl Drop for DispatchManager {
    fn drop(&mut self) {
        if let Some(handle) = self.queue_handle.take() {
            handle.abort();
        }
    }
}
