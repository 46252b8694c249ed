use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use job_store::{JobId, JobStatus, JobStore, LockAttempt, Recipient, SendOutcome, StoreError};
use sms_gateway::{ConfigError, SmsGateway};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Dispatch engine configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Age after which a processing lock is considered abandoned (default: 15 minutes)
    pub lock_timeout: chrono::Duration,

    /// Pending recipients fetched per page (default: 50)
    pub page_size: i64,

    /// Pause after every send, success or failure (default: 100 ms)
    pub send_delay: Duration,

    /// Sender number for every message
    pub from_number: String,

    /// URL the provider posts delivery updates to
    pub status_callback_url: String,
}

impl DispatchConfig {
    /// Default tunables for the given sender and callback URL
    pub fn new(from_number: impl Into<String>, status_callback_url: impl Into<String>) -> Self {
        Self {
            lock_timeout: chrono::Duration::minutes(15),
            page_size: 50,
            send_delay: Duration::from_millis(100),
            from_number: from_number.into(),
            status_callback_url: status_callback_url.into(),
        }
    }

    /// Reads `TWILIO_FROM_NUMBER` and `SMS_STATUS_CALLBACK_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let from_number = env::var("TWILIO_FROM_NUMBER")
            .map_err(|_| ConfigError::MissingVar("TWILIO_FROM_NUMBER"))?;
        let status_callback_url = env::var("SMS_STATUS_CALLBACK_URL")
            .map_err(|_| ConfigError::MissingVar("SMS_STATUS_CALLBACK_URL"))?;

        Ok(Self::new(from_number, status_callback_url))
    }
}

/// Result of a dispatch invocation that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every pending recipient was handed to the gateway
    Completed {
        /// Recipients accepted by the gateway in this run
        sent: u64,
        /// Recipients rejected by the gateway in this run
        failed: u64,
    },
    /// Another worker holds a fresh lock; nothing was sent
    LockHeld,
    /// The job is not in `processing`
    Skipped(JobStatus),
}

/// Errors that abort a dispatch run
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A store read or write failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The job was removed after the lock was taken
    #[error("Job {0} disappeared during dispatch")]
    JobNotFound(JobId),

    /// The lease could not be renewed; another worker owns the job now
    #[error("Lost the dispatch lease on job {0}")]
    LeaseLost(JobId),
}

#[derive(Debug, Default)]
struct DrainSummary {
    sent: u64,
    failed: u64,
}

/// Current lease timestamp, truncated to the microsecond precision the
/// store keeps so it compares equal to the stored value.
fn lease_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Drains a job's pending recipients through the gateway.
///
/// Exclusion between workers rests entirely on the store lease taken by
/// [`JobStore::try_acquire_lock`]; the engine itself keeps no state between
/// invocations.
pub struct DispatchEngine {
    store: Arc<dyn JobStore>,
    gateway: Arc<dyn SmsGateway>,
    config: DispatchConfig,
}

impl DispatchEngine {
    /// Creates an engine over the given store and gateway.
    pub fn new(
        store: Arc<dyn JobStore>,
        gateway: Arc<dyn SmsGateway>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Lease age after which another worker may take over a job
    pub fn lock_timeout(&self) -> chrono::Duration {
        self.config.lock_timeout
    }

    /// Runs one dispatch pass over `job_id`.
    ///
    /// Returns [`DispatchOutcome::LockHeld`] without sending when another
    /// worker holds a fresh lock. The lease is renewed while sending; if
    /// renewal fails the run stops with [`DispatchError::LeaseLost`] and
    /// leaves the job to its new owner. Any other error after the lock is
    /// taken marks the job `failed` and releases the lock before it is
    /// returned.
    pub async fn dispatch(&self, job_id: &JobId) -> Result<DispatchOutcome, DispatchError> {
        let lease = lease_timestamp();
        match self
            .store
            .try_acquire_lock(job_id, lease, self.config.lock_timeout)
            .await?
        {
            LockAttempt::Acquired => {}
            LockAttempt::Held { locked_at } => {
                debug!(job_id = %job_id, %locked_at, "Job locked by another worker");
                return Ok(DispatchOutcome::LockHeld);
            }
            LockAttempt::NotProcessing(status) => {
                debug!(job_id = %job_id, %status, "Job is not processing");
                return Ok(DispatchOutcome::Skipped(status));
            }
        }

        info!(job_id = %job_id, "Acquired dispatch lock");

        match self.run(job_id, lease).await {
            Ok(summary) => {
                info!(
                    job_id = %job_id,
                    sent = summary.sent,
                    failed = summary.failed,
                    "Dispatch completed"
                );
                Ok(DispatchOutcome::Completed {
                    sent: summary.sent,
                    failed: summary.failed,
                })
            }
            Err(e @ DispatchError::LeaseLost(_)) => {
                warn!(job_id = %job_id, "Dispatch stopped: {}", e);
                Err(e)
            }
            Err(e) => {
                error!(job_id = %job_id, "Dispatch aborted: {}", e);
                if let Err(finish_err) = self.store.finish_job(job_id, JobStatus::Failed).await {
                    error!(job_id = %job_id, "Failed to mark job as failed: {}", finish_err);
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        job_id: &JobId,
        mut lease: DateTime<Utc>,
    ) -> Result<DrainSummary, DispatchError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(DispatchError::JobNotFound(*job_id))?;

        let counts = self.store.reconcile_dispatch_counters(job_id).await?;
        debug!(
            job_id = %job_id,
            success = counts.success,
            failure = counts.failure,
            pending = counts.pending,
            "Reconciled dispatch counters"
        );

        let renew_after = self.config.lock_timeout / 3;
        let mut summary = DrainSummary::default();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .store
                .pending_recipients(job_id, cursor.as_deref(), self.config.page_size)
                .await?;

            if page.is_empty() {
                break;
            }

            for recipient in &page {
                if Utc::now() - lease >= renew_after {
                    self.renew_lease(job_id, &mut lease).await?;
                }
                self.send_to_recipient(job_id, &job.message, recipient, &mut summary)
                    .await?;
                sleep(self.config.send_delay).await;
            }

            cursor = page.last().map(|r| r.phone_number.clone());
            self.renew_lease(job_id, &mut lease).await?;

            if !self.store.has_pending_recipients(job_id).await? {
                break;
            }
        }

        self.store.finish_job(job_id, JobStatus::Completed).await?;
        Ok(summary)
    }

    async fn renew_lease(
        &self,
        job_id: &JobId,
        lease: &mut DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let now = lease_timestamp();
        if !self.store.renew_lock(job_id, *lease, now).await? {
            return Err(DispatchError::LeaseLost(*job_id));
        }
        *lease = now;
        Ok(())
    }

    async fn send_to_recipient(
        &self,
        job_id: &JobId,
        message: &str,
        recipient: &Recipient,
        summary: &mut DrainSummary,
    ) -> Result<(), DispatchError> {
        let to = recipient.phone_number.as_str();

        match self
            .gateway
            .send(
                to,
                &self.config.from_number,
                message,
                &self.config.status_callback_url,
            )
            .await
        {
            Ok(sent) => {
                let recorded = self
                    .store
                    .mark_recipient_sent(job_id, to, &sent.id, &sent.status, Utc::now())
                    .await?;
                if recorded {
                    self.store
                        .increment_dispatch_counters(job_id, SendOutcome::Sent)
                        .await?;
                    summary.sent += 1;
                } else {
                    warn!(job_id = %job_id, to, "Recipient already dispatched elsewhere");
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, to, "SMS send failed: {}", e);
                let recorded = self
                    .store
                    .mark_recipient_failed(job_id, to, e.code(), &e.to_string())
                    .await?;
                if recorded {
                    self.store
                        .increment_dispatch_counters(job_id, SendOutcome::Failed)
                        .await?;
                    summary.failed += 1;
                } else {
                    warn!(job_id = %job_id, to, "Recipient already dispatched elsewhere");
                }
            }
        }

        Ok(())
    }
}
