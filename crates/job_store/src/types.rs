use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned identifier of a bulk send job.
pub type JobId = Uuid;

/// Lifecycle of a bulk send job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, recipients still being written.
    Pending,
    /// Ready for (or under) dispatch.
    Processing,
    /// Every recipient has been handed to the gateway or failed.
    Completed,
    /// Dispatch aborted on an unexpected error.
    Failed,
}

impl JobStatus {
    /// Database representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::DataFormat(format!("unknown job status '{}'", other))),
        }
    }
}

/// Dispatch state of a single recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientStatus {
    /// Not yet handed to the gateway.
    Pending,
    /// Accepted by the gateway.
    Sent,
    /// Rejected by the gateway.
    Failed,
}

impl RecipientStatus {
    /// Database representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Failed => "failed",
        }
    }
}

impl FromStr for RecipientStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecipientStatus::Pending),
            "sent" => Ok(RecipientStatus::Sent),
            "failed" => Ok(RecipientStatus::Failed),
            other => Err(StoreError::DataFormat(format!(
                "unknown recipient status '{}'",
                other
            ))),
        }
    }
}

/// A bulk send request and its aggregate counters.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Unique identifier of the job
    pub id: JobId,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// Last write to the job; doubles as a dispatch liveness signal
    pub updated_at: DateTime<Utc>,
    /// Actor who created the job
    pub created_by: Uuid,
    /// Email of the actor who created the job
    pub created_by_email: String,
    /// Message body sent to every recipient
    pub message: String,
    /// Number of distinct normalized recipients
    pub total_recipients: i64,
    /// Current lifecycle status
    pub status: JobStatus,
    /// Dispatch lease timestamp, if held
    pub processing_lock: Option<DateTime<Utc>>,
    /// Recipients accepted by the gateway
    pub success_count: i64,
    /// Recipients rejected by the gateway
    pub failure_count: i64,
    /// Recipients not yet dispatched
    pub pending_count: i64,
    /// Recipients the carrier confirmed as delivered
    pub delivered_count: i64,
    /// Recipients the carrier reported as failed or undelivered
    pub undelivered_count: i64,
    /// Raw inputs the normalizer rejected
    pub invalid_phones: Vec<String>,
}

impl Job {
    /// Whether the dispatch lease is held and younger than `timeout`.
    pub fn lock_is_fresh(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match self.processing_lock {
            Some(locked_at) => now - locked_at < timeout,
            None => false,
        }
    }
}

/// Fields supplied by admission when creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Actor creating the job
    pub created_by: Uuid,
    /// Email of the actor creating the job
    pub created_by_email: String,
    /// Message body
    pub message: String,
    /// Distinct normalized recipient count
    pub total_recipients: i64,
    /// Rejected raw inputs
    pub invalid_phones: Vec<String>,
}

/// One phone number's delivery record within a job.
#[derive(Debug, Clone, Serialize)]
pub struct Recipient {
    /// Owning job
    pub job_id: JobId,
    /// Canonical E.164 number, unique within the job
    pub phone_number: String,
    /// Dispatch state
    pub status: RecipientStatus,
    /// Latest provider-reported delivery status
    pub delivery_status: Option<String>,
    /// Provider message id assigned on hand-off
    pub provider_message_id: Option<String>,
    /// Last error message
    pub error_message: Option<String>,
    /// Last error code
    pub error_code: Option<String>,
    /// When the gateway accepted the message
    pub sent_at: Option<DateTime<Utc>>,
    /// When the carrier confirmed delivery
    pub delivered_at: Option<DateTime<Utc>>,
    /// Number of failed send attempts
    pub retry_count: i32,
    /// Whether a terminal delivery status was already counted on the job
    pub delivery_counted: bool,
}

/// Result of the transactional lease acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    /// The lease is now held by the caller.
    Acquired,
    /// Another worker holds a fresh lease.
    Held {
        /// When the current lease was taken
        locked_at: DateTime<Utc>,
    },
    /// The job is not in `processing`, so there is nothing to dispatch.
    NotProcessing(JobStatus),
}

/// Dispatch result of one recipient, as applied to the job counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// `success_count += 1`, `pending_count -= 1`
    Sent,
    /// `failure_count += 1`, `pending_count -= 1`
    Failed,
}

/// Terminal delivery result, as applied to the job counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// `delivered_count += 1`
    Delivered,
    /// `undelivered_count += 1`
    Undelivered,
}

/// Recipient fields written by the delivery callback correlator.
#[derive(Debug, Clone)]
pub struct DeliveryUpdate {
    /// Provider status string, stored verbatim
    pub delivery_status: String,
    /// Set for `delivered`
    pub delivered_at: Option<DateTime<Utc>>,
    /// Error code from the callback
    pub error_code: Option<String>,
    /// Error message from the callback
    pub error_message: Option<String>,
    /// Terminal outcome, if the status is terminal
    pub outcome: Option<DeliveryOutcome>,
}

impl DeliveryUpdate {
    /// Whether the error fields should be overwritten.
    pub fn is_failure(&self) -> bool {
        self.outcome == Some(DeliveryOutcome::Undelivered)
    }
}

/// Dispatch counters re-derived from recipient statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchCounts {
    /// Recipients in `sent`
    pub success: i64,
    /// Recipients in `failed`
    pub failure: i64,
    /// Recipients in `pending`
    pub pending: i64,
}

/// Errors raised by a job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failure
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The job does not exist
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// The recipient does not exist in the job
    #[error("Recipient {phone_number} not found in job {job_id}")]
    RecipientNotFound {
        /// Owning job
        job_id: JobId,
        /// Recipient key
        phone_number: String,
    },

    /// A stored value could not be interpreted
    #[error("Data format error: {0}")]
    DataFormat(String),
}
