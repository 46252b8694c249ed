use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::types::*;

/// Persistence contract shared by admission, dispatch and delivery correlation.
///
/// Implementations must provide two primitives the callers rely on:
/// `try_acquire_lock` is a single read-then-conditional-write transaction,
/// and every counter method is a standalone atomic increment that never
/// reads the prior value at the application level.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Counts the jobs `actor` created at or after `since`.
    async fn count_jobs_created_since(
        &self,
        actor: &Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Inserts a job in `pending` with `pending_count = total_recipients`.
    async fn create_job(&self, job: &NewJob) -> Result<Job, StoreError>;

    /// Inserts one pending recipient per phone number in a single write.
    /// Numbers already present in the job are ignored.
    async fn create_recipients(
        &self,
        job_id: &JobId,
        phone_numbers: &[String],
    ) -> Result<(), StoreError>;

    /// Sets the job status without touching the lease.
    async fn set_job_status(&self, job_id: &JobId, status: JobStatus) -> Result<(), StoreError>;

    /// Reads a job.
    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError>;

    /// Takes the dispatch lease unless a lease younger than `timeout` exists.
    async fn try_acquire_lock(
        &self,
        job_id: &JobId,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<LockAttempt, StoreError>;

    /// Sets the final status and clears the lease.
    async fn finish_job(&self, job_id: &JobId, status: JobStatus) -> Result<(), StoreError>;

    /// Moves the lease from `held` to `now` and bumps `updated_at`.
    ///
    /// Returns `false`, changing nothing, when the job is no longer in
    /// `processing` or its lease is not `held` anymore (another worker took
    /// it over).
    async fn renew_lock(
        &self,
        job_id: &JobId,
        held: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Up to `limit` pending recipients ordered by phone number, strictly
    /// after `after` when given.
    async fn pending_recipients(
        &self,
        job_id: &JobId,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Recipient>, StoreError>;

    /// Whether any recipient of the job is still pending.
    async fn has_pending_recipients(&self, job_id: &JobId) -> Result<bool, StoreError>;

    /// Records a gateway hand-off. Returns `false` when the recipient was
    /// no longer pending, in which case nothing is written.
    async fn mark_recipient_sent(
        &self,
        job_id: &JobId,
        phone_number: &str,
        provider_message_id: &str,
        delivery_status: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Records a gateway rejection and increments `retry_count`. Returns
    /// `false` when the recipient was no longer pending.
    async fn mark_recipient_failed(
        &self,
        job_id: &JobId,
        phone_number: &str,
        error_code: Option<&str>,
        error_message: &str,
    ) -> Result<bool, StoreError>;

    /// Atomically applies one dispatch result to the job counters.
    async fn increment_dispatch_counters(
        &self,
        job_id: &JobId,
        outcome: SendOutcome,
    ) -> Result<(), StoreError>;

    /// Re-derives `success`/`failure`/`pending` from recipient statuses and
    /// writes them to the job. Only called by the lease holder.
    async fn reconcile_dispatch_counters(
        &self,
        job_id: &JobId,
    ) -> Result<DispatchCounts, StoreError>;

    /// Finds a recipient by provider message id across every job.
    async fn find_recipient_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Recipient>, StoreError>;

    /// Writes delivery fields (last write wins).
    ///
    /// When the update carries a terminal outcome and the recipient had not
    /// been counted yet, the recipient is marked counted and the matching
    /// job counter is incremented in the same transaction; the call then
    /// returns `true`.
    async fn record_delivery_status(
        &self,
        job_id: &JobId,
        phone_number: &str,
        update: &DeliveryUpdate,
    ) -> Result<bool, StoreError>;

    /// All recipients of a job ordered by phone number.
    async fn list_recipients(&self, job_id: &JobId) -> Result<Vec<Recipient>, StoreError>;

    /// Jobs in `processing` whose lease is absent or older than `stale_before`.
    async fn dispatchable_jobs(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobId>, StoreError>;
}
