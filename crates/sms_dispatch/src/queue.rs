use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use job_store::{JobId, JobStore, StoreError};
use tokio::sync::{RwLock, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::engine::{DispatchEngine, DispatchError, DispatchOutcome};

/// Tunables for the background queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How often to look for dispatchable jobs (default: 30 seconds)
    pub sweep_interval: Duration,

    /// Maximum jobs picked up per sweep (default: 50)
    pub sweep_limit: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            sweep_limit: 50,
        }
    }
}

/// Handle used to wake the queue when a job enters `processing`.
#[derive(Debug, Clone)]
pub struct DispatchNotifier {
    tx: mpsc::UnboundedSender<JobId>,
}

impl DispatchNotifier {
    /// Asks the queue to dispatch `job_id` now instead of at the next sweep.
    pub fn notify(&self, job_id: JobId) {
        if self.tx.send(job_id).is_err() {
            warn!(job_id = %job_id, "Dispatch queue is not running, job left for the next sweep");
        }
    }
}

/// Runs the dispatch engine in the background.
///
/// Jobs arrive either through a [`DispatchNotifier`] or from the periodic
/// sweep, which also picks up jobs whose lock went stale after a crash.
pub struct DispatchQueue {
    store: Arc<dyn JobStore>,
    engine: Arc<DispatchEngine>,
    config: QueueConfig,

    /// Jobs currently running in this process
    active_jobs: Arc<RwLock<HashSet<JobId>>>,

    rx: mpsc::UnboundedReceiver<JobId>,
}

impl DispatchQueue {
    /// Creates the queue and the notifier that feeds it.
    pub fn new(
        store: Arc<dyn JobStore>,
        engine: Arc<DispatchEngine>,
        config: Option<QueueConfig>,
    ) -> (Self, DispatchNotifier) {
        let (tx, rx) = mpsc::unbounded_channel();

        let queue = Self {
            store,
            engine,
            config: config.unwrap_or_default(),
            active_jobs: Arc::new(RwLock::new(HashSet::new())),
            rx,
        };

        (queue, DispatchNotifier { tx })
    }

    /// Processes notifications and sweeps until every notifier is dropped.
    pub async fn run(mut self) {
        info!("Starting dispatch queue");

        let mut sweep = interval(self.config.sweep_interval);

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Error sweeping dispatchable jobs: {}", e);
                    }
                }
                job = self.rx.recv() => match job {
                    Some(job_id) => self.spawn_dispatch(job_id).await,
                    None => {
                        info!("All dispatch notifiers dropped, stopping queue");
                        break;
                    }
                },
            }
        }
    }

    async fn sweep(&self) -> Result<(), StoreError> {
        let stale_before = Utc::now() - self.engine.lock_timeout();
        let jobs = self
            .store
            .dispatchable_jobs(stale_before, self.config.sweep_limit)
            .await?;

        if jobs.is_empty() {
            debug!("No dispatchable jobs");
            return Ok(());
        }

        info!("Found {} dispatchable jobs", jobs.len());
        for job_id in jobs {
            self.spawn_dispatch(job_id).await;
        }
        Ok(())
    }

    async fn spawn_dispatch(&self, job_id: JobId) {
        {
            let mut active_jobs = self.active_jobs.write().await;
            if !active_jobs.insert(job_id) {
                debug!(job_id = %job_id, "Skipping job, already dispatching");
                return;
            }
        }

        let engine = self.engine.clone();
        let active_jobs = self.active_jobs.clone();

        tokio::spawn(async move {
            let result = engine.dispatch(&job_id).await;

            active_jobs.write().await.remove(&job_id);

            match result {
                Ok(DispatchOutcome::Completed { sent, failed }) => {
                    debug!(job_id = %job_id, sent, failed, "Dispatch task finished");
                }
                Ok(outcome) => debug!(job_id = %job_id, ?outcome, "Dispatch task skipped job"),
                Err(e @ DispatchError::LeaseLost(_)) => warn!(job_id = %job_id, "{}", e),
                Err(e) => error!(job_id = %job_id, "Dispatch failed: {}", e),
            }
        });
    }
}
