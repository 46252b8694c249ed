use std::sync::Arc;

use auth_services::types::Actor;
use chrono::{Duration, Utc};
use job_store::{JobId, JobStatus, JobStore, NewJob, StoreError};
use tracing::{info, warn};

use crate::phone::batch_normalize;
use crate::queue::DispatchNotifier;

/// Admission limits
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Trailing window for the per-actor rate limit (default: 5 minutes)
    pub rate_limit_window: Duration,

    /// Jobs an actor may create inside the window (default: 5)
    pub rate_limit_max_jobs: i64,

    /// Maximum message length in characters (default: 1600)
    pub max_message_chars: usize,

    /// Recipients written per store call (default: 500)
    pub recipient_batch_size: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_limit_window: Duration::minutes(5),
            rate_limit_max_jobs: 5,
            max_message_chars: 1600,
            recipient_batch_size: 500,
        }
    }
}

/// Reasons a send request is refused
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// No authenticated caller
    #[error("Authentication required")]
    Unauthenticated,

    /// Bad or empty input
    #[error("{0}")]
    InvalidArgument(String),

    /// The caller exceeded the send rate limit
    #[error("Too many sends. Please wait a few minutes before sending again.")]
    RateLimited,

    /// Unexpected store failure
    #[error("Internal error: {0}")]
    Internal(#[from] StoreError),
}

impl SendError {
    /// Wire name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            SendError::Unauthenticated => "unauthenticated",
            SendError::InvalidArgument(_) => "invalid-argument",
            SendError::RateLimited => "resource-exhausted",
            SendError::Internal(_) => "internal",
        }
    }
}

/// Validates send requests and turns them into dispatchable jobs
pub struct AdmissionController {
    store: Arc<dyn JobStore>,
    config: AdmissionConfig,
    notifier: Option<DispatchNotifier>,
}

impl AdmissionController {
    /// Creates a controller without a queue to wake up; jobs are then only
    /// found by the queue's periodic sweep.
    pub fn new(store: Arc<dyn JobStore>, config: Option<AdmissionConfig>) -> Self {
        Self {
            store,
            config: config.unwrap_or_default(),
            notifier: None,
        }
    }

    /// Wakes the dispatch queue after each admitted job.
    pub fn with_notifier(mut self, notifier: DispatchNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Admits a bulk send and returns the new job id.
    ///
    /// Checks run in a fixed order: authentication, rate limit, recipient
    /// list, message, then normalization. The returned job is already in
    /// `processing`. Two calls with the same input create two jobs.
    pub async fn create_send(
        &self,
        actor: Option<&Actor>,
        phone_numbers: &[String],
        message: &str,
    ) -> Result<JobId, SendError> {
        let actor = actor.ok_or(SendError::Unauthenticated)?;

        let since = Utc::now() - self.config.rate_limit_window;
        let recent = self.store.count_jobs_created_since(&actor.id, since).await?;
        if recent >= self.config.rate_limit_max_jobs {
            warn!(actor = %actor.id, recent, "Send rate limit reached");
            return Err(SendError::RateLimited);
        }

        if phone_numbers.is_empty() {
            return Err(SendError::InvalidArgument(
                "Phone numbers must be a non-empty list".to_string(),
            ));
        }

        if message.is_empty() {
            return Err(SendError::InvalidArgument(
                "Message must not be empty".to_string(),
            ));
        }
        if message.chars().count() > self.config.max_message_chars {
            return Err(SendError::InvalidArgument(format!(
                "Message must be at most {} characters",
                self.config.max_message_chars
            )));
        }

        let (valid, rejected) = batch_normalize(phone_numbers);
        if valid.is_empty() {
            return Err(SendError::InvalidArgument(format!(
                "No valid phone numbers provided. Invalid numbers: {}",
                rejected.join(", ")
            )));
        }

        let job = self
            .store
            .create_job(&NewJob {
                created_by: actor.id,
                created_by_email: actor.email.clone(),
                message: message.to_string(),
                total_recipients: valid.len() as i64,
                invalid_phones: rejected,
            })
            .await?;

        let numbers: Vec<String> = valid.into_iter().collect();
        for chunk in numbers.chunks(self.config.recipient_batch_size.max(1)) {
            self.store.create_recipients(&job.id, chunk).await?;
        }

        self.store
            .set_job_status(&job.id, JobStatus::Processing)
            .await?;

        info!(
            job_id = %job.id,
            actor = %actor.id,
            recipients = job.total_recipients,
            invalid = job.invalid_phones.len(),
            "Bulk send admitted"
        );

        if let Some(notifier) = &self.notifier {
            notifier.notify(job.id);
        }

        Ok(job.id)
    }
}
