use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use auth_services::types::Actor;
use chrono::{DateTime, Utc};
use job_store::{
    DeliveryUpdate, DispatchCounts, Job, JobId, JobStatus, JobStore, LockAttempt, MemoryJobStore,
    NewJob, Recipient, RecipientStatus, SendOutcome, StoreError,
};
use secrecy::SecretString;
use sms_dispatch::{
    AdmissionController, CallbackOutcome, DeliveryCorrelator, DispatchConfig, DispatchEngine,
    DispatchError, DispatchOutcome, IgnoreReason,
};
use sms_gateway::signature::{compute_signature, format_signature_header};
use sms_gateway::{GatewayError, SentMessage, SmsGateway};
use uuid::Uuid;

const FROM: &str = "+15550000000";
const CALLBACK_URL: &str = "https://sms.example.com/webhooks/sms/status";
const AUTH_TOKEN: &str = "test-auth-token";

/// Gateway that accepts everything except the numbers it was told to reject.
#[derive(Default)]
struct ScriptedGateway {
    rejected: HashSet<String>,
    calls: Mutex<Vec<(String, String, String)>>,
    next_id: AtomicUsize,
}

impl ScriptedGateway {
    fn rejecting(numbers: &[&str]) -> Self {
        Self {
            rejected: numbers.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SmsGateway for ScriptedGateway {
    async fn send(
        &self,
        to: &str,
        from: &str,
        _body: &str,
        status_callback: &str,
    ) -> Result<SentMessage, GatewayError> {
        self.calls.lock().unwrap().push((
            to.to_string(),
            from.to_string(),
            status_callback.to_string(),
        ));

        if self.rejected.contains(to) {
            return Err(GatewayError::Rejected {
                code: Some("21211".to_string()),
                message: "The 'To' number is not a valid phone number.".to_string(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SentMessage {
            id: format!("SM{:032}", n),
            status: "queued".to_string(),
        })
    }
}

struct Harness {
    store: Arc<MemoryJobStore>,
    gateway: Arc<ScriptedGateway>,
    admission: AdmissionController,
    engine: DispatchEngine,
    correlator: DeliveryCorrelator,
    actor: Actor,
}

fn test_config() -> DispatchConfig {
    let mut config = DispatchConfig::new(FROM, CALLBACK_URL);
    config.send_delay = Duration::ZERO;
    config.page_size = 2;
    config
}

impl Harness {
    fn new(gateway: ScriptedGateway) -> Self {
        Self::with_config(gateway, test_config())
    }

    fn with_config(gateway: ScriptedGateway, config: DispatchConfig) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        let gateway = Arc::new(gateway);

        Self {
            admission: AdmissionController::new(store.clone(), None),
            engine: DispatchEngine::new(store.clone(), gateway.clone(), config),
            correlator: DeliveryCorrelator::new(
                store.clone(),
                CALLBACK_URL,
                SecretString::from(AUTH_TOKEN.to_string()),
            ),
            store,
            gateway,
            actor: Actor {
                id: Uuid::new_v4(),
                email: "ops@example.com".to_string(),
            },
        }
    }

    async fn admit(&self, numbers: &[&str]) -> JobId {
        let numbers: Vec<String> = numbers.iter().map(|n| n.to_string()).collect();
        self.admission
            .create_send(Some(&self.actor), &numbers, "Hello")
            .await
            .unwrap()
    }

    async fn provider_id(&self, job_id: &JobId, phone_number: &str) -> String {
        self.store
            .list_recipients(job_id)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.phone_number == phone_number)
            .and_then(|r| r.provider_message_id)
            .unwrap()
    }

    async fn assert_invariants(&self, job_id: &JobId) {
        let job = self.store.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(
            job.success_count + job.failure_count + job.pending_count,
            job.total_recipients
        );
        assert!(job.delivered_count + job.undelivered_count <= job.success_count);
        assert!(job.pending_count >= 0);
    }
}

/// Memory store whose recipient write fails for one phone number.
struct FailingStore {
    inner: MemoryJobStore,
    failing_phone: String,
}

impl FailingStore {
    fn failing_on(phone_number: &str) -> Self {
        Self {
            inner: MemoryJobStore::new(),
            failing_phone: phone_number.to_string(),
        }
    }
}

#[async_trait]
impl JobStore for FailingStore {
    async fn count_jobs_created_since(
        &self,
        actor: &Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.inner.count_jobs_created_since(actor, since).await
    }

    async fn create_job(&self, job: &NewJob) -> Result<Job, StoreError> {
        self.inner.create_job(job).await
    }

    async fn create_recipients(
        &self,
        job_id: &JobId,
        phone_numbers: &[String],
    ) -> Result<(), StoreError> {
        self.inner.create_recipients(job_id, phone_numbers).await
    }

    async fn set_job_status(&self, job_id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        self.inner.set_job_status(job_id, status).await
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn try_acquire_lock(
        &self,
        job_id: &JobId,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> Result<LockAttempt, StoreError> {
        self.inner.try_acquire_lock(job_id, now, timeout).await
    }

    async fn finish_job(&self, job_id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        self.inner.finish_job(job_id, status).await
    }

    async fn renew_lock(
        &self,
        job_id: &JobId,
        held: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.renew_lock(job_id, held, now).await
    }

    async fn pending_recipients(
        &self,
        job_id: &JobId,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Recipient>, StoreError> {
        self.inner.pending_recipients(job_id, after, limit).await
    }

    async fn has_pending_recipients(&self, job_id: &JobId) -> Result<bool, StoreError> {
        self.inner.has_pending_recipients(job_id).await
    }

    async fn mark_recipient_sent(
        &self,
        job_id: &JobId,
        phone_number: &str,
        provider_message_id: &str,
        delivery_status: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if phone_number == self.failing_phone {
            return Err(StoreError::DataFormat("recipient write rejected".to_string()));
        }
        self.inner
            .mark_recipient_sent(
                job_id,
                phone_number,
                provider_message_id,
                delivery_status,
                sent_at,
            )
            .await
    }

    async fn mark_recipient_failed(
        &self,
        job_id: &JobId,
        phone_number: &str,
        error_code: Option<&str>,
        error_message: &str,
    ) -> Result<bool, StoreError> {
        self.inner
            .mark_recipient_failed(job_id, phone_number, error_code, error_message)
            .await
    }

    async fn increment_dispatch_counters(
        &self,
        job_id: &JobId,
        outcome: SendOutcome,
    ) -> Result<(), StoreError> {
        self.inner.increment_dispatch_counters(job_id, outcome).await
    }

    async fn reconcile_dispatch_counters(
        &self,
        job_id: &JobId,
    ) -> Result<DispatchCounts, StoreError> {
        self.inner.reconcile_dispatch_counters(job_id).await
    }

    async fn find_recipient_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Recipient>, StoreError> {
        self.inner.find_recipient_by_provider_id(provider_message_id).await
    }

    async fn record_delivery_status(
        &self,
        job_id: &JobId,
        phone_number: &str,
        update: &DeliveryUpdate,
    ) -> Result<bool, StoreError> {
        self.inner
            .record_delivery_status(job_id, phone_number, update)
            .await
    }

    async fn list_recipients(&self, job_id: &JobId) -> Result<Vec<Recipient>, StoreError> {
        self.inner.list_recipients(job_id).await
    }

    async fn dispatchable_jobs(
        &self,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobId>, StoreError> {
        self.inner.dispatchable_jobs(stale_before, limit).await
    }
}

fn signed_callback(fields: &[(&str, &str)]) -> (String, Vec<u8>) {
    let params: Vec<(String, String)> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter())
        .finish();
    let digest = compute_signature(CALLBACK_URL, &params, AUTH_TOKEN.as_bytes()).unwrap();
    let signature = format_signature_header(&digest);

    (signature, body.into_bytes())
}

#[tokio::test]
async fn test_end_to_end_success() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234567", "bad-number"]).await;

    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.total_recipients, 1);
    assert_eq!(job.invalid_phones, vec!["bad-number"]);
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.pending_count, 1);

    let outcome = harness.engine.dispatch(&job_id).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Completed { sent: 1, failed: 0 });

    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.success_count, 1);
    assert_eq!(job.failure_count, 0);
    assert_eq!(job.pending_count, 0);
    assert!(job.processing_lock.is_none());

    let recipients = harness.store.list_recipients(&job_id).await.unwrap();
    assert_eq!(recipients[0].status, RecipientStatus::Sent);
    assert_eq!(recipients[0].delivery_status.as_deref(), Some("queued"));
    assert!(recipients[0].sent_at.is_some());

    let calls = harness.gateway.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![(
            "+15551234567".to_string(),
            FROM.to_string(),
            CALLBACK_URL.to_string()
        )]
    );
}

#[tokio::test]
async fn test_end_to_end_gateway_failure() {
    let harness = Harness::new(ScriptedGateway::rejecting(&["+15551234567"]));
    let job_id = harness.admit(&["5551234567", "bad-number"]).await;

    let outcome = harness.engine.dispatch(&job_id).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Completed { sent: 0, failed: 1 });

    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.failure_count, 1);
    assert_eq!(job.pending_count, 0);

    let recipient = &harness.store.list_recipients(&job_id).await.unwrap()[0];
    assert_eq!(recipient.status, RecipientStatus::Failed);
    assert_eq!(recipient.error_code.as_deref(), Some("21211"));
    assert_eq!(recipient.retry_count, 1);
    assert!(recipient.provider_message_id.is_none());
}

#[tokio::test]
async fn test_duplicate_numbers_collapse_to_one_recipient() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234567", "5551234567"]).await;

    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.total_recipients, 1);

    harness.engine.dispatch(&job_id).await.unwrap();
    assert_eq!(harness.gateway.call_count(), 1);
}

#[tokio::test]
async fn test_same_request_twice_creates_two_jobs() {
    let harness = Harness::new(ScriptedGateway::default());
    let first = harness.admit(&["5551234567"]).await;
    let second = harness.admit(&["5551234567"]).await;

    assert_ne!(first, second);
}

#[tokio::test]
async fn test_fresh_lock_blocks_second_invocation() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234567", "5551234568"]).await;
    harness
        .store
        .set_processing_lock(&job_id, Some(Utc::now()))
        .await
        .unwrap();

    let outcome = harness.engine.dispatch(&job_id).await.unwrap();

    assert_eq!(outcome, DispatchOutcome::LockHeld);
    assert_eq!(harness.gateway.call_count(), 0);
    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.pending_count, 2);
}

#[tokio::test]
async fn test_concurrent_invocations_send_each_recipient_once() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness
        .admit(&["5551234561", "5551234562", "5551234563"])
        .await;

    let (a, b) = tokio::join!(
        harness.engine.dispatch(&job_id),
        harness.engine.dispatch(&job_id)
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    // The loser sees either the live lock or the already completed job.
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, DispatchOutcome::Completed { .. }))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(harness.gateway.call_count(), 3);
    harness.assert_invariants(&job_id).await;
}

#[tokio::test]
async fn test_long_drain_keeps_its_lease() {
    let mut config = test_config();
    config.lock_timeout = chrono::Duration::milliseconds(300);
    config.send_delay = Duration::from_millis(50);
    config.page_size = 10;
    let harness = Harness::with_config(ScriptedGateway::default(), config.clone());

    let numbers: Vec<String> = (0..10).map(|i| format!("555000000{}", i)).collect();
    let numbers: Vec<&str> = numbers.iter().map(String::as_str).collect();
    let job_id = harness.admit(&numbers).await;

    // Second worker arrives after the initial lease would have gone stale.
    let second = DispatchEngine::new(harness.store.clone(), harness.gateway.clone(), config);
    let (first, late) = tokio::join!(harness.engine.dispatch(&job_id), async {
        tokio::time::sleep(Duration::from_millis(350)).await;
        second.dispatch(&job_id).await
    });

    assert_eq!(first.unwrap(), DispatchOutcome::Completed { sent: 10, failed: 0 });
    assert_eq!(late.unwrap(), DispatchOutcome::LockHeld);
    assert_eq!(harness.gateway.call_count(), 10);

    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.success_count, 10);
    assert_eq!(job.pending_count, 0);
    harness.assert_invariants(&job_id).await;
}

#[tokio::test]
async fn test_store_failure_marks_job_failed() {
    let store = Arc::new(FailingStore::failing_on("+15551234562"));
    let admission = AdmissionController::new(store.clone(), None);
    let actor = Actor {
        id: Uuid::new_v4(),
        email: "ops@example.com".to_string(),
    };
    let numbers: Vec<String> = ["5551234561", "5551234562", "5551234563"]
        .iter()
        .map(|n| n.to_string())
        .collect();
    let job_id = admission
        .create_send(Some(&actor), &numbers, "Hello")
        .await
        .unwrap();

    let gateway = Arc::new(ScriptedGateway::default());
    let engine = DispatchEngine::new(store.clone(), gateway.clone(), test_config());
    let result = engine.dispatch(&job_id).await;

    assert!(matches!(result, Err(DispatchError::Store(StoreError::DataFormat(_)))));
    assert_eq!(gateway.call_count(), 2);

    let job = store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.processing_lock.is_none());
    assert_eq!(job.success_count, 1);
    assert_eq!(job.pending_count, 2);

    let statuses: Vec<RecipientStatus> = store
        .list_recipients(&job_id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            RecipientStatus::Sent,
            RecipientStatus::Pending,
            RecipientStatus::Pending
        ]
    );

    // A failed job is not picked up again.
    let rerun = engine.dispatch(&job_id).await.unwrap();
    assert_eq!(rerun, DispatchOutcome::Skipped(JobStatus::Failed));
}

#[tokio::test]
async fn test_stale_lock_is_recovered() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234567"]).await;
    harness
        .store
        .set_processing_lock(&job_id, Some(Utc::now() - chrono::Duration::minutes(16)))
        .await
        .unwrap();

    let outcome = harness.engine.dispatch(&job_id).await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Completed { sent: 1, failed: 0 });
    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_rerun_only_touches_pending_recipients() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234561", "5551234562"]).await;

    // A worker sent one message, then crashed before updating the counters.
    harness
        .store
        .mark_recipient_sent(&job_id, "+15551234561", "SMcrashed", "queued", Utc::now())
        .await
        .unwrap();
    harness
        .store
        .set_processing_lock(&job_id, Some(Utc::now() - chrono::Duration::minutes(20)))
        .await
        .unwrap();

    let outcome = harness.engine.dispatch(&job_id).await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Completed { sent: 1, failed: 0 });
    assert_eq!(harness.gateway.call_count(), 1);

    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.success_count, 2);
    assert_eq!(job.pending_count, 0);
    harness.assert_invariants(&job_id).await;
}

#[tokio::test]
async fn test_completed_job_is_not_redispatched() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234567"]).await;
    harness.engine.dispatch(&job_id).await.unwrap();

    let outcome = harness.engine.dispatch(&job_id).await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Skipped(JobStatus::Completed));
    assert_eq!(harness.gateway.call_count(), 1);
}

#[tokio::test]
async fn test_delivered_callback_counts_once() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234567"]).await;
    harness.engine.dispatch(&job_id).await.unwrap();
    let sid = harness.provider_id(&job_id, "+15551234567").await;

    let (signature, body) = signed_callback(&[
        ("MessageSid", sid.as_str()),
        ("MessageStatus", "delivered"),
        ("To", "+15551234567"),
    ]);

    let first = harness
        .correlator
        .handle_callback(Some(&signature), &body)
        .await;
    assert_eq!(
        first,
        CallbackOutcome::Updated {
            job_id,
            status: "delivered".to_string(),
            counted: true
        }
    );

    let again = harness
        .correlator
        .handle_callback(Some(&signature), &body)
        .await;
    assert!(matches!(again, CallbackOutcome::Updated { counted: false, .. }));

    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.delivered_count, 1);

    let recipient = &harness.store.list_recipients(&job_id).await.unwrap()[0];
    assert_eq!(recipient.delivery_status.as_deref(), Some("delivered"));
    assert!(recipient.delivered_at.is_some());
    harness.assert_invariants(&job_id).await;
}

#[tokio::test]
async fn test_undelivered_callback_records_error() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234567"]).await;
    harness.engine.dispatch(&job_id).await.unwrap();
    let sid = harness.provider_id(&job_id, "+15551234567").await;

    let (signature, body) = signed_callback(&[
        ("MessageSid", sid.as_str()),
        ("MessageStatus", "undelivered"),
        ("ErrorCode", "30003"),
        ("ErrorMessage", "Unreachable destination handset"),
    ]);
    harness
        .correlator
        .handle_callback(Some(&signature), &body)
        .await;

    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.undelivered_count, 1);
    assert_eq!(job.delivered_count, 0);

    let recipient = &harness.store.list_recipients(&job_id).await.unwrap()[0];
    assert_eq!(recipient.error_code.as_deref(), Some("30003"));
    assert!(recipient.delivered_at.is_none());
}

#[tokio::test]
async fn test_intermediate_status_updates_recipient_only() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234567"]).await;
    harness.engine.dispatch(&job_id).await.unwrap();
    let sid = harness.provider_id(&job_id, "+15551234567").await;

    let (signature, body) =
        signed_callback(&[("MessageSid", sid.as_str()), ("MessageStatus", "sent")]);
    let outcome = harness
        .correlator
        .handle_callback(Some(&signature), &body)
        .await;

    assert!(matches!(outcome, CallbackOutcome::Updated { counted: false, .. }));
    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.delivered_count + job.undelivered_count, 0);

    let recipient = &harness.store.list_recipients(&job_id).await.unwrap()[0];
    assert_eq!(recipient.delivery_status.as_deref(), Some("sent"));
}

#[tokio::test]
async fn test_unknown_message_changes_nothing() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234567"]).await;
    harness.engine.dispatch(&job_id).await.unwrap();
    let before = harness.store.get_job(&job_id).await.unwrap().unwrap();

    let (signature, body) =
        signed_callback(&[("MessageSid", "SMunknown"), ("MessageStatus", "delivered")]);
    let outcome = harness
        .correlator
        .handle_callback(Some(&signature), &body)
        .await;

    assert_eq!(
        outcome,
        CallbackOutcome::Ignored(IgnoreReason::UnknownMessage)
    );
    let after = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(after.delivered_count, before.delivered_count);
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn test_invalid_signature_is_ignored() {
    let harness = Harness::new(ScriptedGateway::default());
    let job_id = harness.admit(&["5551234567"]).await;
    harness.engine.dispatch(&job_id).await.unwrap();
    let sid = harness.provider_id(&job_id, "+15551234567").await;

    let (_, body) =
        signed_callback(&[("MessageSid", sid.as_str()), ("MessageStatus", "delivered")]);
    let (other_signature, _) =
        signed_callback(&[("MessageSid", sid.as_str()), ("MessageStatus", "failed")]);

    assert_eq!(
        harness.correlator.handle_callback(None, &body).await,
        CallbackOutcome::Ignored(IgnoreReason::InvalidSignature)
    );
    assert_eq!(
        harness
            .correlator
            .handle_callback(Some(&other_signature), &body)
            .await,
        CallbackOutcome::Ignored(IgnoreReason::InvalidSignature)
    );

    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.delivered_count, 0);
}

#[tokio::test]
async fn test_callback_missing_fields_is_ignored() {
    let harness = Harness::new(ScriptedGateway::default());

    let (signature, body) = signed_callback(&[("MessageStatus", "delivered")]);
    let outcome = harness
        .correlator
        .handle_callback(Some(&signature), &body)
        .await;

    assert_eq!(outcome, CallbackOutcome::Ignored(IgnoreReason::MissingFields));
}

#[tokio::test]
async fn test_invariants_hold_for_mixed_outcomes() {
    let harness = Harness::new(ScriptedGateway::rejecting(&["+15551234562", "+15551234564"]));
    let numbers = ["5551234561", "5551234562", "5551234563", "5551234564", "5551234565"];
    let job_id = harness.admit(&numbers).await;
    harness.assert_invariants(&job_id).await;

    let outcome = harness.engine.dispatch(&job_id).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Completed { sent: 3, failed: 2 });
    harness.assert_invariants(&job_id).await;

    for (phone, status) in [
        ("+15551234561", "delivered"),
        ("+15551234563", "undelivered"),
        ("+15551234565", "delivered"),
    ] {
        let sid = harness.provider_id(&job_id, phone).await;
        let (signature, body) =
            signed_callback(&[("MessageSid", sid.as_str()), ("MessageStatus", status)]);
        harness
            .correlator
            .handle_callback(Some(&signature), &body)
            .await;
        // Provider retries must not move the counters.
        harness
            .correlator
            .handle_callback(Some(&signature), &body)
            .await;
        harness.assert_invariants(&job_id).await;
    }

    let job = harness.store.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.delivered_count, 2);
    assert_eq!(job.undelivered_count, 1);
}
