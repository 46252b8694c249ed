use std::sync::Arc;

use chrono::Utc;
use job_store::{DeliveryOutcome, DeliveryUpdate, JobId, JobStore, StoreError};
use secrecy::{ExposeSecret, SecretString};
use sms_gateway::signature::verify_signature;
use tracing::{debug, error, info, warn};

/// Why a callback left no trace in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Signature header missing or not matching
    InvalidSignature,
    /// `MessageSid` or `MessageStatus` absent
    MissingFields,
    /// No recipient carries the callback's message id
    UnknownMessage,
    /// The store failed while applying the update
    StoreFailure,
}

/// What a callback did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Nothing changed
    Ignored(IgnoreReason),
    /// The recipient was updated
    Updated {
        /// Job owning the recipient
        job_id: JobId,
        /// Provider status applied
        status: String,
        /// Whether a job delivery counter moved
        counted: bool,
    },
}

#[derive(Debug)]
struct StatusCallback {
    message_sid: String,
    message_status: String,
    to: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl StatusCallback {
    fn from_params(params: &[(String, String)]) -> Option<Self> {
        let field = |name: &str| {
            params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .filter(|value| !value.is_empty())
        };

        Some(Self {
            message_sid: field("MessageSid")?,
            message_status: field("MessageStatus")?,
            to: field("To"),
            error_code: field("ErrorCode"),
            error_message: field("ErrorMessage"),
        })
    }

    fn into_update(self) -> DeliveryUpdate {
        let outcome = match self.message_status.as_str() {
            "delivered" => Some(DeliveryOutcome::Delivered),
            "failed" | "undelivered" => Some(DeliveryOutcome::Undelivered),
            _ => None,
        };

        DeliveryUpdate {
            delivered_at: (outcome == Some(DeliveryOutcome::Delivered)).then(Utc::now),
            delivery_status: self.message_status,
            error_code: self.error_code,
            error_message: self.error_message,
            outcome,
        }
    }
}

/// Applies provider delivery callbacks to jobs and recipients.
pub struct DeliveryCorrelator {
    store: Arc<dyn JobStore>,
    callback_url: String,
    secret: SecretString,
}

impl DeliveryCorrelator {
    /// `callback_url` must be byte-identical to the URL handed to the
    /// provider at send time, since it is part of the signed payload.
    pub fn new(
        store: Arc<dyn JobStore>,
        callback_url: impl Into<String>,
        secret: SecretString,
    ) -> Self {
        Self {
            store,
            callback_url: callback_url.into(),
            secret,
        }
    }

    /// Handles one form-encoded status callback.
    ///
    /// Never fails: the provider retries anything but a success, so every
    /// problem is logged and reported as [`CallbackOutcome::Ignored`].
    pub async fn handle_callback(&self, signature: Option<&str>, body: &[u8]) -> CallbackOutcome {
        let params: Vec<(String, String)> =
            url::form_urlencoded::parse(body).into_owned().collect();

        let signature_valid = signature.is_some_and(|header| {
            verify_signature(
                &self.callback_url,
                &params,
                header,
                self.secret.expose_secret().as_bytes(),
            )
        });
        if !signature_valid {
            warn!(
                signature_present = signature.is_some(),
                "Ignoring status callback with invalid signature"
            );
            return CallbackOutcome::Ignored(IgnoreReason::InvalidSignature);
        }

        let Some(callback) = StatusCallback::from_params(&params) else {
            warn!("Ignoring status callback without MessageSid or MessageStatus");
            return CallbackOutcome::Ignored(IgnoreReason::MissingFields);
        };

        match self.apply(callback).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to apply status callback: {}", e);
                CallbackOutcome::Ignored(IgnoreReason::StoreFailure)
            }
        }
    }

    async fn apply(&self, callback: StatusCallback) -> Result<CallbackOutcome, StoreError> {
        let Some(recipient) = self
            .store
            .find_recipient_by_provider_id(&callback.message_sid)
            .await?
        else {
            info!(
                message_sid = %callback.message_sid,
                to = callback.to.as_deref().unwrap_or(""),
                "Status callback for unknown message"
            );
            return Ok(CallbackOutcome::Ignored(IgnoreReason::UnknownMessage));
        };

        let message_sid = callback.message_sid.clone();
        let update = callback.into_update();

        let counted = self
            .store
            .record_delivery_status(&recipient.job_id, &recipient.phone_number, &update)
            .await?;
        if update.outcome.is_some() && !counted {
            debug!(message_sid = %message_sid, "Terminal status already counted");
        }

        info!(
            job_id = %recipient.job_id,
            message_sid = %message_sid,
            status = %update.delivery_status,
            counted,
            "Applied status callback"
        );

        Ok(CallbackOutcome::Updated {
            job_id: recipient.job_id,
            status: update.delivery_status,
            counted,
        })
    }
}
