use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::store::JobStore;
use crate::types::*;

const JOB_COLUMNS: &str = r#"
    id, created_at, updated_at, created_by, created_by_email, message,
    total_recipients, status, processing_lock, success_count, failure_count,
    pending_count, delivered_count, undelivered_count, invalid_phones
"#;

const RECIPIENT_COLUMNS: &str = r#"
    job_id, phone_number, status, delivery_status, provider_message_id,
    error_message, error_code, sent_at, delivered_at, retry_count, delivery_counted
"#;

/// Job store backed by PostgreSQL
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Creates a new instance of `PgJobStore` with the provided database connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
        let status: String = row.try_get("status")?;

        Ok(Job {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            created_by: row.try_get("created_by")?,
            created_by_email: row.try_get("created_by_email")?,
            message: row.try_get("message")?,
            total_recipients: row.try_get("total_recipients")?,
            status: status.parse()?,
            processing_lock: row.try_get("processing_lock")?,
            success_count: row.try_get("success_count")?,
            failure_count: row.try_get("failure_count")?,
            pending_count: row.try_get("pending_count")?,
            delivered_count: row.try_get("delivered_count")?,
            undelivered_count: row.try_get("undelivered_count")?,
            invalid_phones: row.try_get("invalid_phones")?,
        })
    }

    fn recipient_from_row(row: &PgRow) -> Result<Recipient, StoreError> {
        let status: String = row.try_get("status")?;

        Ok(Recipient {
            job_id: row.try_get("job_id")?,
            phone_number: row.try_get("phone_number")?,
            status: status.parse()?,
            delivery_status: row.try_get("delivery_status")?,
            provider_message_id: row.try_get("provider_message_id")?,
            error_message: row.try_get("error_message")?,
            error_code: row.try_get("error_code")?,
            sent_at: row.try_get("sent_at")?,
            delivered_at: row.try_get("delivered_at")?,
            retry_count: row.try_get("retry_count")?,
            delivery_counted: row.try_get("delivery_counted")?,
        })
    }

    fn expect_job_row(rows_affected: u64, job_id: &JobId) -> Result<(), StoreError> {
        if rows_affected == 0 {
            return Err(StoreError::JobNotFound(*job_id));
        }
        Ok(())
    }

    /// Interprets the row count of a `pending`-guarded recipient update:
    /// zero rows means either the recipient already left `pending` or it
    /// does not exist at all.
    async fn pending_transition(
        &self,
        rows_affected: u64,
        job_id: &JobId,
        phone_number: &str,
    ) -> Result<bool, StoreError> {
        if rows_affected > 0 {
            return Ok(true);
        }

        let exists: bool = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sms_recipients WHERE job_id = $1 AND phone_number = $2
            ) AS present
            "#,
        )
        .bind(job_id)
        .bind(phone_number)
        .fetch_one(&self.pool)
        .await?
        .try_get("present")?;

        if !exists {
            return Err(StoreError::RecipientNotFound {
                job_id: *job_id,
                phone_number: phone_number.to_string(),
            });
        }
        Ok(false)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn count_jobs_created_since(
        &self,
        actor: &Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM sms_jobs WHERE created_by = $1 AND created_at >= $2",
        )
        .bind(actor)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("count")?)
    }

    async fn create_job(&self, job: &NewJob) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sms_jobs (
                created_by, created_by_email, message, total_recipients,
                pending_count, invalid_phones
            ) VALUES ($1, $2, $3, $4, $4, $5)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.created_by)
        .bind(&job.created_by_email)
        .bind(&job.message)
        .bind(job.total_recipients)
        .bind(&job.invalid_phones)
        .fetch_one(&self.pool)
        .await?;

        Self::job_from_row(&row)
    }

    async fn create_recipients(
        &self,
        job_id: &JobId,
        phone_numbers: &[String],
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sms_recipients (job_id, phone_number)
            SELECT $1, phone FROM UNNEST($2::text[]) AS phone
            ON CONFLICT (job_id, phone_number) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(phone_numbers)
        .execute(&self.pool)
        .await?;

        debug!(
            job_id = %job_id,
            inserted = result.rows_affected(),
            "Inserted recipient batch"
        );
        Ok(())
    }

    async fn set_job_status(&self, job_id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE sms_jobs SET status = $1, updated_at = NOW() WHERE id = $2")
                .bind(status.as_str())
                .bind(job_id)
                .execute(&self.pool)
                .await?;

        Self::expect_job_row(result.rows_affected(), job_id)
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM sms_jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::job_from_row).transpose()
    }

    async fn try_acquire_lock(
        &self,
        job_id: &JobId,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<LockAttempt, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row =
            sqlx::query("SELECT status, processing_lock FROM sms_jobs WHERE id = $1 FOR UPDATE")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StoreError::JobNotFound(*job_id))?;

        let status: JobStatus = row.try_get::<String, _>("status")?.parse()?;
        if status != JobStatus::Processing {
            tx.rollback().await?;
            return Ok(LockAttempt::NotProcessing(status));
        }

        let lock: Option<DateTime<Utc>> = row.try_get("processing_lock")?;
        if let Some(locked_at) = lock {
            if now - locked_at < timeout {
                tx.rollback().await?;
                return Ok(LockAttempt::Held { locked_at });
            }
        }

        sqlx::query("UPDATE sms_jobs SET processing_lock = $1, updated_at = NOW() WHERE id = $2")
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(LockAttempt::Acquired)
    }

    async fn finish_job(&self, job_id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sms_jobs
            SET status = $1, processing_lock = NULL, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(status.as_str())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Self::expect_job_row(result.rows_affected(), job_id)
    }

    async fn renew_lock(
        &self,
        job_id: &JobId,
        held: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sms_jobs
            SET processing_lock = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND processing_lock = $2
            "#,
        )
        .bind(job_id)
        .bind(held)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn pending_recipients(
        &self,
        job_id: &JobId,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Recipient>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECIPIENT_COLUMNS}
            FROM sms_recipients
            WHERE job_id = $1
              AND status = 'pending'
              AND ($2::text IS NULL OR phone_number > $2)
            ORDER BY phone_number
            LIMIT $3
            "#
        ))
        .bind(job_id)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::recipient_from_row).collect()
    }

    async fn has_pending_recipients(&self, job_id: &JobId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sms_recipients WHERE job_id = $1 AND status = 'pending'
            ) AS has_pending
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("has_pending")?)
    }

    async fn mark_recipient_sent(
        &self,
        job_id: &JobId,
        phone_number: &str,
        provider_message_id: &str,
        delivery_status: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sms_recipients
            SET status = 'sent',
                sent_at = $3,
                provider_message_id = $4,
                delivery_status = $5
            WHERE job_id = $1 AND phone_number = $2 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .bind(phone_number)
        .bind(sent_at)
        .bind(provider_message_id)
        .bind(delivery_status)
        .execute(&self.pool)
        .await?;

        self.pending_transition(result.rows_affected(), job_id, phone_number)
            .await
    }

    async fn mark_recipient_failed(
        &self,
        job_id: &JobId,
        phone_number: &str,
        error_code: Option<&str>,
        error_message: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sms_recipients
            SET status = 'failed',
                error_code = $3,
                error_message = $4,
                retry_count = retry_count + 1
            WHERE job_id = $1 AND phone_number = $2 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .bind(phone_number)
        .bind(error_code)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        self.pending_transition(result.rows_affected(), job_id, phone_number)
            .await
    }

    async fn increment_dispatch_counters(
        &self,
        job_id: &JobId,
        outcome: SendOutcome,
    ) -> Result<(), StoreError> {
        let sql = match outcome {
            SendOutcome::Sent => {
                r#"
                UPDATE sms_jobs
                SET success_count = success_count + 1,
                    pending_count = pending_count - 1,
                    updated_at = NOW()
                WHERE id = $1
                "#
            }
            SendOutcome::Failed => {
                r#"
                UPDATE sms_jobs
                SET failure_count = failure_count + 1,
                    pending_count = pending_count - 1,
                    updated_at = NOW()
                WHERE id = $1
                "#
            }
        };

        let result = sqlx::query(sql).bind(job_id).execute(&self.pool).await?;
        Self::expect_job_row(result.rows_affected(), job_id)
    }

    async fn reconcile_dispatch_counters(
        &self,
        job_id: &JobId,
    ) -> Result<DispatchCounts, StoreError> {
        let row = sqlx::query(
            r#"
            WITH counts AS (
                SELECT
                    COUNT(*) FILTER (WHERE status = 'sent') AS success,
                    COUNT(*) FILTER (WHERE status = 'failed') AS failure,
                    COUNT(*) FILTER (WHERE status = 'pending') AS pending
                FROM sms_recipients
                WHERE job_id = $1
            )
            UPDATE sms_jobs
            SET success_count = counts.success,
                failure_count = counts.failure,
                pending_count = counts.pending,
                updated_at = NOW()
            FROM counts
            WHERE sms_jobs.id = $1
            RETURNING counts.success, counts.failure, counts.pending
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::JobNotFound(*job_id))?;

        Ok(DispatchCounts {
            success: row.try_get("success")?,
            failure: row.try_get("failure")?,
            pending: row.try_get("pending")?,
        })
    }

    async fn find_recipient_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Recipient>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {RECIPIENT_COLUMNS}
            FROM sms_recipients
            WHERE provider_message_id = $1
            LIMIT 1
            "#
        ))
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::recipient_from_row).transpose()
    }

    async fn record_delivery_status(
        &self,
        job_id: &JobId,
        phone_number: &str,
        update: &DeliveryUpdate,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let already_counted: bool = sqlx::query(
            r#"
            SELECT delivery_counted FROM sms_recipients
            WHERE job_id = $1 AND phone_number = $2
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .bind(phone_number)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::RecipientNotFound {
            job_id: *job_id,
            phone_number: phone_number.to_string(),
        })?
        .try_get("delivery_counted")?;

        let count_now = update.outcome.is_some() && !already_counted;

        sqlx::query(
            r#"
            UPDATE sms_recipients
            SET delivery_status = $3,
                delivered_at = COALESCE($4, delivered_at),
                error_code = CASE WHEN $5 THEN $6 ELSE error_code END,
                error_message = CASE WHEN $5 THEN $7 ELSE error_message END,
                delivery_counted = delivery_counted OR $8
            WHERE job_id = $1 AND phone_number = $2
            "#,
        )
        .bind(job_id)
        .bind(phone_number)
        .bind(&update.delivery_status)
        .bind(update.delivered_at)
        .bind(update.is_failure())
        .bind(&update.error_code)
        .bind(&update.error_message)
        .bind(count_now)
        .execute(&mut *tx)
        .await?;

        if let Some(outcome) = update.outcome.filter(|_| count_now) {
            let sql = match outcome {
                DeliveryOutcome::Delivered => {
                    r#"
                    UPDATE sms_jobs
                    SET delivered_count = delivered_count + 1, updated_at = NOW()
                    WHERE id = $1
                    "#
                }
                DeliveryOutcome::Undelivered => {
                    r#"
                    UPDATE sms_jobs
                    SET undelivered_count = undelivered_count + 1, updated_at = NOW()
                    WHERE id = $1
                    "#
                }
            };

            let result = sqlx::query(sql).bind(job_id).execute(&mut *tx).await?;
            Self::expect_job_row(result.rows_affected(), job_id)?;
        }

        tx.commit().await?;
        Ok(count_now)
    }

    async fn list_recipients(&self, job_id: &JobId) -> Result<Vec<Recipient>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM sms_recipients WHERE job_id = $1 ORDER BY phone_number"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::recipient_from_row).collect()
    }

    async fn dispatchable_jobs(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM sms_jobs
            WHERE status = 'processing'
              AND (processing_lock IS NULL OR processing_lock < $1)
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("id").map_err(StoreError::from))
            .collect()
    }
}
