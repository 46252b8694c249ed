use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::JobStore;
use crate::types::*;

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    /// Recipients per job, keyed (and therefore ordered) by phone number
    recipients: HashMap<JobId, BTreeMap<String, Recipient>>,
}

impl MemoryState {
    fn job_mut(&mut self, job_id: &JobId) -> Result<&mut Job, StoreError> {
        self.jobs
            .get_mut(job_id)
            .ok_or(StoreError::JobNotFound(*job_id))
    }

    fn recipient_mut(
        &mut self,
        job_id: &JobId,
        phone_number: &str,
    ) -> Result<&mut Recipient, StoreError> {
        self.recipients
            .get_mut(job_id)
            .and_then(|recipients| recipients.get_mut(phone_number))
            .ok_or_else(|| StoreError::RecipientNotFound {
                job_id: *job_id,
                phone_number: phone_number.to_string(),
            })
    }
}

/// In-process job store.
///
/// Intended for tests and local development. A single mutex serializes every
/// operation, which trivially satisfies the transaction and atomic increment
/// requirements of [`JobStore`].
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the dispatch lease of a job.
    pub async fn set_processing_lock(
        &self,
        job_id: &JobId,
        lock: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.job_mut(job_id)?.processing_lock = lock;
        Ok(())
    }

    /// Overwrites the creation time of a job.
    pub async fn set_created_at(
        &self,
        job_id: &JobId,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.job_mut(job_id)?.created_at = created_at;
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn count_jobs_created_since(
        &self,
        actor: &Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        let count = state
            .jobs
            .values()
            .filter(|job| job.created_by == *actor && job.created_at >= since)
            .count();
        Ok(count as i64)
    }

    async fn create_job(&self, job: &NewJob) -> Result<Job, StoreError> {
        let now = Utc::now();
        let created = Job {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            created_by: job.created_by,
            created_by_email: job.created_by_email.clone(),
            message: job.message.clone(),
            total_recipients: job.total_recipients,
            status: JobStatus::Pending,
            processing_lock: None,
            success_count: 0,
            failure_count: 0,
            pending_count: job.total_recipients,
            delivered_count: 0,
            undelivered_count: 0,
            invalid_phones: job.invalid_phones.clone(),
        };

        let mut state = self.state.lock().await;
        state.jobs.insert(created.id, created.clone());
        state.recipients.insert(created.id, BTreeMap::new());
        Ok(created)
    }

    async fn create_recipients(
        &self,
        job_id: &JobId,
        phone_numbers: &[String],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let recipients = state
            .recipients
            .get_mut(job_id)
            .ok_or(StoreError::JobNotFound(*job_id))?;

        for phone_number in phone_numbers {
            recipients
                .entry(phone_number.clone())
                .or_insert_with(|| Recipient {
                    job_id: *job_id,
                    phone_number: phone_number.clone(),
                    status: RecipientStatus::Pending,
                    delivery_status: None,
                    provider_message_id: None,
                    error_message: None,
                    error_code: None,
                    sent_at: None,
                    delivered_at: None,
                    retry_count: 0,
                    delivery_counted: false,
                });
        }
        Ok(())
    }

    async fn set_job_status(&self, job_id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(job_id).cloned())
    }

    async fn try_acquire_lock(
        &self,
        job_id: &JobId,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<LockAttempt, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;

        if job.status != JobStatus::Processing {
            return Ok(LockAttempt::NotProcessing(job.status));
        }
        if let Some(locked_at) = job.processing_lock {
            if job.lock_is_fresh(now, timeout) {
                return Ok(LockAttempt::Held { locked_at });
            }
        }

        job.processing_lock = Some(now);
        job.updated_at = Utc::now();
        Ok(LockAttempt::Acquired)
    }

    async fn finish_job(&self, job_id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        job.status = status;
        job.processing_lock = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn renew_lock(
        &self,
        job_id: &JobId,
        held: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;

        if job.status != JobStatus::Processing || job.processing_lock != Some(held) {
            return Ok(false);
        }

        job.processing_lock = Some(now);
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn pending_recipients(
        &self,
        job_id: &JobId,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Recipient>, StoreError> {
        let state = self.state.lock().await;
        let recipients = state
            .recipients
            .get(job_id)
            .ok_or(StoreError::JobNotFound(*job_id))?;

        let page = recipients
            .values()
            .filter(|r| r.status == RecipientStatus::Pending)
            .filter(|r| after.is_none_or(|cursor| r.phone_number.as_str() > cursor))
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(page)
    }

    async fn has_pending_recipients(&self, job_id: &JobId) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .recipients
            .get(job_id)
            .is_some_and(|rs| rs.values().any(|r| r.status == RecipientStatus::Pending)))
    }

    async fn mark_recipient_sent(
        &self,
        job_id: &JobId,
        phone_number: &str,
        provider_message_id: &str,
        delivery_status: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let recipient = state.recipient_mut(job_id, phone_number)?;
        if recipient.status != RecipientStatus::Pending {
            return Ok(false);
        }

        recipient.status = RecipientStatus::Sent;
        recipient.sent_at = Some(sent_at);
        recipient.provider_message_id = Some(provider_message_id.to_string());
        recipient.delivery_status = Some(delivery_status.to_string());
        Ok(true)
    }

    async fn mark_recipient_failed(
        &self,
        job_id: &JobId,
        phone_number: &str,
        error_code: Option<&str>,
        error_message: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let recipient = state.recipient_mut(job_id, phone_number)?;
        if recipient.status != RecipientStatus::Pending {
            return Ok(false);
        }

        recipient.status = RecipientStatus::Failed;
        recipient.error_code = error_code.map(str::to_string);
        recipient.error_message = Some(error_message.to_string());
        recipient.retry_count += 1;
        Ok(true)
    }

    async fn increment_dispatch_counters(
        &self,
        job_id: &JobId,
        outcome: SendOutcome,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(job_id)?;
        match outcome {
            SendOutcome::Sent => job.success_count += 1,
            SendOutcome::Failed => job.failure_count += 1,
        }
        job.pending_count -= 1;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn reconcile_dispatch_counters(
        &self,
        job_id: &JobId,
    ) -> Result<DispatchCounts, StoreError> {
        let mut state = self.state.lock().await;
        let mut counts = DispatchCounts::default();
        if let Some(recipients) = state.recipients.get(job_id) {
            for recipient in recipients.values() {
                match recipient.status {
                    RecipientStatus::Sent => counts.success += 1,
                    RecipientStatus::Failed => counts.failure += 1,
                    RecipientStatus::Pending => counts.pending += 1,
                }
            }
        }

        let job = state.job_mut(job_id)?;
        job.success_count = counts.success;
        job.failure_count = counts.failure;
        job.pending_count = counts.pending;
        job.updated_at = Utc::now();
        Ok(counts)
    }

    async fn find_recipient_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Recipient>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .recipients
            .values()
            .flat_map(|rs| rs.values())
            .find(|r| r.provider_message_id.as_deref() == Some(provider_message_id))
            .cloned())
    }

    async fn record_delivery_status(
        &self,
        job_id: &JobId,
        phone_number: &str,
        update: &DeliveryUpdate,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.job_mut(job_id)?;
        let recipient = state.recipient_mut(job_id, phone_number)?;

        recipient.delivery_status = Some(update.delivery_status.clone());
        if update.delivered_at.is_some() {
            recipient.delivered_at = update.delivered_at;
        }
        if update.is_failure() {
            recipient.error_code = update.error_code.clone();
            recipient.error_message = update.error_message.clone();
        }

        let outcome = update.outcome.filter(|_| !recipient.delivery_counted);
        let Some(outcome) = outcome else {
            return Ok(false);
        };
        recipient.delivery_counted = true;

        let job = state.job_mut(job_id)?;
        match outcome {
            DeliveryOutcome::Delivered => job.delivered_count += 1,
            DeliveryOutcome::Undelivered => job.undelivered_count += 1,
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_recipients(&self, job_id: &JobId) -> Result<Vec<Recipient>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .recipients
            .get(job_id)
            .map(|rs| rs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn dispatchable_jobs(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobId>, StoreError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<&Job> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Processing)
            .filter(|job| job.processing_lock.is_none_or(|lock| lock < stale_before))
            .collect();
        jobs.sort_by_key(|job| job.created_at);

        Ok(jobs
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|job| job.id)
            .collect())
    }
}
