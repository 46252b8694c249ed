use chrono::{DateTime, Utc};
use job_store::{Job, JobStatus, Recipient, RecipientStatus, StoreError};
use serde::{Deserialize, Serialize};
use sms_dispatch::SendError;
use uuid::Uuid;
use validator::Validate;

/// Request structure for creating a bulk send
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSendRequest {
    /// Raw phone numbers, normalized server-side
    #[serde(default)]
    #[validate(length(max = 10000, message = "At most 10000 phone numbers per send"))]
    pub phone_numbers: Vec<String>,

    /// Message body
    #[serde(default)]
    pub message: String,
}

/// Response structure for an admitted send
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSendResponse {
    /// Always `true`; failures use the error body
    pub success: bool,
    /// Identifier of the created job
    pub send_id: Uuid,
}

/// One recipient in a send status response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientView {
    /// Normalized phone number
    pub phone_number: String,
    /// Dispatch status
    pub status: RecipientStatus,
    /// Last provider delivery status
    pub delivery_status: Option<String>,
    /// Provider message id
    pub provider_message_id: Option<String>,
    /// Provider error code
    pub error_code: Option<String>,
    /// Provider error message
    pub error_message: Option<String>,
    /// When the gateway accepted the message
    pub sent_at: Option<DateTime<Utc>>,
    /// When the carrier confirmed delivery
    pub delivered_at: Option<DateTime<Utc>>,
    /// Failed send attempts
    pub retry_count: i32,
}

impl From<Recipient> for RecipientView {
    fn from(r: Recipient) -> Self {
        Self {
            phone_number: r.phone_number,
            status: r.status,
            delivery_status: r.delivery_status,
            provider_message_id: r.provider_message_id,
            error_code: r.error_code,
            error_message: r.error_message,
            sent_at: r.sent_at,
            delivered_at: r.delivered_at,
            retry_count: r.retry_count,
        }
    }
}

/// Progress of a bulk send
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendStatusResponse {
    /// Job identifier
    pub id: Uuid,
    /// Job status
    pub status: JobStatus,
    /// Message body
    pub message: String,
    /// Distinct normalized recipients
    pub total_recipients: i64,
    /// Recipients accepted by the gateway
    pub success_count: i64,
    /// Recipients rejected by the gateway
    pub failure_count: i64,
    /// Recipients not yet dispatched
    pub pending_count: i64,
    /// Confirmed deliveries
    pub delivered_count: i64,
    /// Failed deliveries
    pub undelivered_count: i64,
    /// Inputs rejected by the normalizer
    pub invalid_phones: Vec<String>,
    /// When the send was created
    pub created_at: DateTime<Utc>,
    /// Last job update
    pub updated_at: DateTime<Utc>,
    /// Per-recipient state
    pub recipients: Vec<RecipientView>,
}

impl SendStatusResponse {
    /// Builds the response from a job and its recipients
    pub fn new(job: Job, recipients: Vec<Recipient>) -> Self {
        Self {
            id: job.id,
            status: job.status,
            message: job.message,
            total_recipients: job.total_recipients,
            success_count: job.success_count,
            failure_count: job.failure_count,
            pending_count: job.pending_count,
            delivered_count: job.delivered_count,
            undelivered_count: job.undelivered_count,
            invalid_phones: job.invalid_phones,
            created_at: job.created_at,
            updated_at: job.updated_at,
            recipients: recipients.into_iter().map(RecipientView::from).collect(),
        }
    }
}

/// Errors returned by the send API
#[derive(Debug, thiserror::Error)]
pub enum SendApiError {
    /// Admission refused the request
    #[error(transparent)]
    Admission(#[from] SendError),

    /// Request body failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Send does not exist or belongs to someone else
    #[error("Send not found")]
    NotFound,

    /// Store failure while reading a send
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl actix_web::ResponseError for SendApiError {
    fn error_response(&self) -> actix_web::HttpResponse {
        use actix_web::HttpResponse;

        match self {
            SendApiError::Admission(SendError::Unauthenticated) => HttpResponse::Unauthorized()
                .json(serde_json::json!({
                    "error": "unauthenticated",
                    "message": "Authentication required"
                })),
            SendApiError::Admission(SendError::RateLimited) => HttpResponse::TooManyRequests()
                .json(serde_json::json!({
                    "error": "resource-exhausted",
                    "message": SendError::RateLimited.to_string()
                })),
            SendApiError::Admission(SendError::InvalidArgument(msg))
            | SendApiError::Validation(msg) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "invalid-argument",
                "message": msg
            })),
            SendApiError::NotFound => HttpResponse::NotFound().json(serde_json::json!({
                "error": "not-found",
                "message": "Send not found"
            })),
            SendApiError::Admission(SendError::Internal(e)) | SendApiError::Store(e) => {
                log::error!("Send API internal error: {}", e);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}
