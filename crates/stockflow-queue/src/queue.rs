// Named FIFO queues with at-least-once delivery
//
// Every queue gets a waiting list, an active list, a delayed set and a
// per-job visibility lock, all on the shared broker. Handlers run with
// single concurrency per queue per worker process; scale comes from worker
// count, not per-queue parallelism.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use stockflow_core::Result;

use crate::broker::Broker;

/// Per-queue settings calibrated for serverless-scale cold starts
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    /// Exceeds worst-case cold start + job runtime
    pub lock_duration_ms: u64,
    /// Renew at ~50% of the lock to absorb GC pauses
    pub lock_renew_ms: u64,
    pub stalled_interval_ms: u64,
    pub max_stalled_count: u32,
    pub rate_limit_max: i64,
    pub rate_limit_window_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lock_duration_ms: 120_000,
            lock_renew_ms: 60_000,
            stalled_interval_ms: 60_000,
            max_stalled_count: 3,
            rate_limit_max: 10,
            rate_limit_window_ms: 5_000,
            poll_interval_ms: 500,
        }
    }
}

/// One unit of queued work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub stalled_count: u32,
    pub enqueued_at_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStatus {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: i64,
    pub failed: i64,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<()>;
}

fn waiting_key(queue: &str) -> String {
    format!("queue:{queue}:waiting")
}
fn active_key(queue: &str) -> String {
    format!("queue:{queue}:active")
}
fn delayed_key(queue: &str) -> String {
    format!("queue:{queue}:delayed")
}
fn lock_key(queue: &str, job_id: &str) -> String {
    format!("queue:{queue}:lock:{job_id}")
}
fn counter_key(queue: &str, which: &str) -> String {
    format!("queue:{queue}:{which}")
}

const COUNTER_TTL_MS: u64 = 7 * 24 * 3600 * 1000;

/// The broker-facing mechanics, clonable into the spawned loops
#[derive(Clone)]
struct QueueCore {
    broker: Arc<dyn Broker>,
    settings: QueueSettings,
}

pub struct JobQueues {
    core: QueueCore,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueues {
    pub fn new(broker: Arc<dyn Broker>, settings: QueueSettings) -> Self {
        Self {
            core: QueueCore { broker, settings },
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.core.broker.clone()
    }

    /// Enqueue a payload; a delay parks the job in the delayed set until due
    pub async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<String> {
        self.core.enqueue(queue, payload, delay).await
    }

    pub async fn status(&self, queue: &str) -> Result<QueueStatus> {
        self.core.status(queue).await
    }

    /// Re-queue active jobs whose visibility lock vanished
    pub async fn recover_stalled(&self, queue: &str) -> Result<usize> {
        self.core.recover_stalled(queue).await
    }

    /// Install the single-concurrency handler for a queue and start its
    /// poll + stall-recovery loops
    pub async fn register(&self, queue: &str, handler: Arc<dyn JobHandler>) {
        let poll = {
            let core = self.core.clone();
            let queue = queue.to_string();
            tokio::spawn(async move {
                core.poll_loop(&queue, handler).await;
            })
        };
        let stall = {
            let core = self.core.clone();
            let queue = queue.to_string();
            tokio::spawn(async move {
                core.stall_loop(&queue).await;
            })
        };
        let mut workers = self.workers.lock().await;
        workers.push(poll);
        workers.push(stall);
        info!(queue, "queue handler registered");
    }

    /// Stop all poll and stall loops
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            handle.abort();
        }
        info!("queue workers stopped");
    }
}

impl QueueCore {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<String> {
        let job = Job {
            id: format!("job_{}", Uuid::now_v7().simple()),
            queue: queue.to_string(),
            payload,
            stalled_count: 0,
            enqueued_at_ms: Utc::now().timestamp_millis(),
        };
        let raw = serde_json::to_string(&job).map_err(|e| {
            stockflow_core::StockflowError::validation(format!("job not serializable: {e}"))
        })?;

        match delay {
            Some(delay) if !delay.is_zero() => {
                let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
                self.broker.add_delayed(&delayed_key(queue), &raw, due).await?;
            }
            _ => {
                self.broker.push_back(&waiting_key(queue), &raw).await?;
            }
        }

        debug!(queue, job_id = %job.id, delayed = delay.is_some(), "job enqueued");
        Ok(job.id)
    }

    async fn status(&self, queue: &str) -> Result<QueueStatus> {
        let completed = self
            .broker
            .get(&counter_key(queue, "completed"))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let failed = self
            .broker
            .get(&counter_key(queue, "failed"))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(QueueStatus {
            waiting: self.broker.list_len(&waiting_key(queue)).await?,
            active: self.broker.list_len(&active_key(queue)).await?,
            delayed: self.broker.delayed_len(&delayed_key(queue)).await?,
            completed,
            failed,
        })
    }

    async fn poll_loop(&self, queue: &str, handler: Arc<dyn JobHandler>) {
        let idle = Duration::from_millis(self.settings.poll_interval_ms);
        loop {
            match self.poll_once(queue, handler.as_ref()).await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(idle).await,
                Err(e) => {
                    warn!(queue, error = %e, "queue poll error");
                    tokio::time::sleep(idle).await;
                }
            }
        }
    }

    /// One poll iteration; returns whether a job was processed
    async fn poll_once(&self, queue: &str, handler: &dyn JobHandler) -> Result<bool> {
        self.promote_due(queue).await?;

        if self.broker.list_len(&waiting_key(queue)).await? == 0 {
            return Ok(false);
        }

        // Rate limiter: 10 jobs per 5 s per queue; over-limit slots just
        // wait for the next window, nothing bounces back to the caller
        let count = self
            .broker
            .incr_with_ttl(&counter_key(queue, "rl"), self.settings.rate_limit_window_ms)
            .await?;
        if count > self.settings.rate_limit_max {
            tokio::time::sleep(Duration::from_millis(self.settings.rate_limit_window_ms / 2)).await;
            return Ok(false);
        }

        let Some(raw) = self
            .broker
            .pop_to(&waiting_key(queue), &active_key(queue))
            .await?
        else {
            return Ok(false);
        };

        let job: Job = match serde_json::from_str(&raw) {
            Ok(job) => job,
            Err(e) => {
                error!(queue, error = %e, "dropping unparseable job");
                self.broker.remove_from_list(&active_key(queue), &raw).await?;
                self.bump_counter(queue, "failed").await;
                return Ok(true);
            }
        };

        let lock = lock_key(queue, &job.id);
        self.broker
            .set_px(&lock, "held", self.settings.lock_duration_ms)
            .await?;

        // Renew at half-life while the handler runs
        let renewal = {
            let broker = self.broker.clone();
            let lock = lock.clone();
            let renew_every = Duration::from_millis(self.settings.lock_renew_ms);
            let lock_ms = self.settings.lock_duration_ms;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(renew_every).await;
                    if let Err(e) = broker.set_px(&lock, "held", lock_ms).await {
                        warn!(error = %e, "job lock renewal failed");
                    }
                }
            })
        };

        let result = handler.handle(job.clone()).await;
        renewal.abort();
        self.broker.del(&lock).await?;
        self.broker.remove_from_list(&active_key(queue), &raw).await?;

        match result {
            Ok(()) => {
                debug!(queue, job_id = %job.id, "job completed");
                self.bump_counter(queue, "completed").await;
            }
            Err(e) => {
                // Stage-level retries are the orchestrator's business; the
                // substrate only records the failure
                warn!(queue, job_id = %job.id, error = %e, "job handler failed");
                self.bump_counter(queue, "failed").await;
            }
        }
        Ok(true)
    }

    /// Move due delayed jobs into the waiting list
    async fn promote_due(&self, queue: &str) -> Result<()> {
        let due = self
            .broker
            .pop_due(&delayed_key(queue), Utc::now().timestamp_millis())
            .await?;
        for raw in due {
            self.broker.push_back(&waiting_key(queue), &raw).await?;
        }
        Ok(())
    }

    async fn stall_loop(&self, queue: &str) {
        let interval = Duration::from_millis(self.settings.stalled_interval_ms);
        loop {
            tokio::time::sleep(interval).await;
            if let Err(e) = self.recover_stalled(queue).await {
                warn!(queue, error = %e, "stall recovery error");
            }
        }
    }

    /// Re-queue active jobs whose visibility lock vanished (crashed worker).
    /// A job stalling more than `max_stalled_count` times is dropped as
    /// failed instead of looping forever.
    async fn recover_stalled(&self, queue: &str) -> Result<usize> {
        let mut recovered = 0;
        for raw in self.broker.list_range(&active_key(queue)).await? {
            let Ok(mut job) = serde_json::from_str::<Job>(&raw) else {
                self.broker.remove_from_list(&active_key(queue), &raw).await?;
                continue;
            };
            if self.broker.get(&lock_key(queue, &job.id)).await?.is_some() {
                continue;
            }

            self.broker.remove_from_list(&active_key(queue), &raw).await?;
            job.stalled_count += 1;
            if job.stalled_count > self.settings.max_stalled_count {
                warn!(queue, job_id = %job.id, "job exceeded stall budget, dropping");
                self.bump_counter(queue, "failed").await;
                continue;
            }

            let requeued = serde_json::to_string(&job).expect("job serializes");
            self.broker.push_back(&waiting_key(queue), &requeued).await?;
            info!(queue, job_id = %job.id, stalled_count = job.stalled_count, "stalled job re-queued");
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn bump_counter(&self, queue: &str, which: &str) {
        if let Err(e) = self
            .broker
            .incr_with_ttl(&counter_key(queue, which), COUNTER_TTL_MS)
            .await
        {
            debug!(queue, which, error = %e, "queue counter update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use tokio::sync::mpsc;

    struct ChannelHandler {
        tx: mpsc::UnboundedSender<Job>,
        fail: bool,
    }

    #[async_trait]
    impl JobHandler for ChannelHandler {
        async fn handle(&self, job: Job) -> Result<()> {
            self.tx.send(job).unwrap();
            if self.fail {
                Err(stockflow_core::StockflowError::transient("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn queues() -> JobQueues {
        JobQueues::new(Arc::new(InMemoryBroker::new()), QueueSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_flow_through_a_registered_handler_in_order() {
        let queues = queues();
        let (tx, mut rx) = mpsc::unbounded_channel();
        queues
            .register("ai_parsing", Arc::new(ChannelHandler { tx, fail: false }))
            .await;

        let first = queues
            .enqueue("ai_parsing", serde_json::json!({"n": 1}), None)
            .await
            .unwrap();
        let second = queues
            .enqueue("ai_parsing", serde_json::json!({"n": 2}), None)
            .await
            .unwrap();

        let got_first = rx.recv().await.unwrap();
        let got_second = rx.recv().await.unwrap();
        assert_eq!(got_first.id, first);
        assert_eq!(got_second.id, second);

        queues.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn handler_failures_count_as_failed() {
        let queues = queues();
        let (tx, mut rx) = mpsc::unbounded_channel();
        queues
            .register("database_save", Arc::new(ChannelHandler { tx, fail: true }))
            .await;

        queues
            .enqueue("database_save", serde_json::json!({}), None)
            .await
            .unwrap();
        rx.recv().await.unwrap();

        // Let the completion bookkeeping run
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = queues.status("database_save").await.unwrap();
        assert_eq!(status.failed, 1);
        assert_eq!(status.active, 0);

        queues.shutdown().await;
    }

    #[tokio::test]
    async fn stalled_jobs_requeue_until_the_budget_runs_out() {
        let broker = Arc::new(InMemoryBroker::new());
        let queues = JobQueues::new(broker.clone(), QueueSettings::default());

        // A job sitting in the active list with no visibility lock
        let job = Job {
            id: "job_stuck".into(),
            queue: "shopify_sync".into(),
            payload: serde_json::json!({}),
            stalled_count: 0,
            enqueued_at_ms: 0,
        };
        let raw = serde_json::to_string(&job).unwrap();
        broker.push_back(&active_key("shopify_sync"), &raw).await.unwrap();

        let recovered = queues.recover_stalled("shopify_sync").await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(broker.list_len(&waiting_key("shopify_sync")).await.unwrap(), 1);
        assert_eq!(broker.list_len(&active_key("shopify_sync")).await.unwrap(), 0);

        // Exhaust the stall budget: the job ends up dropped, not re-queued
        let mut job = job;
        job.stalled_count = QueueSettings::default().max_stalled_count;
        let raw = serde_json::to_string(&job).unwrap();
        broker.push_back(&active_key("shopify_sync"), &raw).await.unwrap();
        let recovered = queues.recover_stalled("shopify_sync").await.unwrap();
        assert_eq!(recovered, 0);
        assert_eq!(broker.list_len(&waiting_key("shopify_sync")).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_jobs_park_until_promoted() {
        let broker = Arc::new(InMemoryBroker::new());
        let queues = JobQueues::new(broker.clone(), QueueSettings::default());

        queues
            .enqueue(
                "status_update",
                serde_json::json!({}),
                Some(Duration::from_secs(3600)),
            )
            .await
            .unwrap();

        let status = queues.status("status_update").await.unwrap();
        assert_eq!(status.waiting, 0);
        assert_eq!(status.delayed, 1);

        queues.core.promote_due("status_update").await.unwrap();
        // Still parked: due time is an hour of wall clock away
        assert_eq!(broker.list_len(&waiting_key("status_update")).await.unwrap(), 0);
    }
}
