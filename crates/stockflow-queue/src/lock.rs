// Purchase order advisory lock
//
// Not a database row lock: a broker key holding the owning workflow id and
// an acquisition timestamp. Row locks do not compose with multi-stage,
// multi-invocation workflows; a broker key with explicit stale reclaim does.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use stockflow_core::{Result, StockflowError};

use crate::broker::Broker;

/// A holder older than this is considered crashed and reclaimable.
/// Comfortably above a healthy transaction; the previous 10-minute default
/// blocked parallel merchants for the full window after any worker crash.
const LOCK_STALE_MS: i64 = 30_000;

/// Safety TTL on the key itself, far above the stale threshold
const LOCK_TTL_MS: u64 = 10 * 60 * 1000;

const WAIT_BACKOFF: Duration = Duration::from_millis(500);
const WAIT_CAP: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    workflow_id: String,
    acquired_at_ms: i64,
}

fn lock_key(po_id: Uuid) -> String {
    format!("po_lock:{po_id}")
}

#[derive(Clone)]
pub struct PoLockService {
    broker: Arc<dyn Broker>,
}

impl PoLockService {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Acquire the lock for a workflow, waiting briefly on contention.
    /// Stale holders are reclaimed; a live holder wins until the wait cap,
    /// after which the stage fails with a retryable error.
    pub async fn acquire(&self, po_id: Uuid, workflow_id: &str) -> Result<()> {
        let key = lock_key(po_id);
        let started = tokio::time::Instant::now();

        loop {
            let record = LockRecord {
                workflow_id: workflow_id.to_string(),
                acquired_at_ms: Utc::now().timestamp_millis(),
            };
            let raw = serde_json::to_string(&record).expect("lock record serializes");

            if self.broker.set_nx_px(&key, &raw, LOCK_TTL_MS).await? {
                return Ok(());
            }

            match self.broker.get(&key).await? {
                None => continue, // holder released between the two calls
                Some(held) => {
                    let holder: LockRecord = match serde_json::from_str(&held) {
                        Ok(holder) => holder,
                        Err(_) => {
                            // Unreadable record: treat as stale
                            warn!(po_id = %po_id, "unreadable lock record, reclaiming");
                            self.broker.set_px(&key, &raw, LOCK_TTL_MS).await?;
                            return Ok(());
                        }
                    };

                    if holder.workflow_id == workflow_id {
                        // Re-entrant: the same workflow re-running a stage
                        return Ok(());
                    }

                    let age_ms = Utc::now().timestamp_millis() - holder.acquired_at_ms;
                    if age_ms > LOCK_STALE_MS {
                        info!(
                            po_id = %po_id,
                            stale_holder = %holder.workflow_id,
                            new_holder = %workflow_id,
                            age_ms,
                            "reclaiming stale purchase order lock"
                        );
                        self.broker.set_px(&key, &raw, LOCK_TTL_MS).await?;
                        return Ok(());
                    }
                }
            }

            if started.elapsed() >= WAIT_CAP {
                return Err(StockflowError::LockContended(po_id));
            }
            tokio::time::sleep(WAIT_BACKOFF).await;
        }
    }

    /// Release only if still held by this workflow
    pub async fn release(&self, po_id: Uuid, workflow_id: &str) -> Result<()> {
        let key = lock_key(po_id);
        if let Some(held) = self.broker.get(&key).await? {
            let holder: LockRecord = serde_json::from_str(&held).unwrap_or(LockRecord {
                workflow_id: String::new(),
                acquired_at_ms: 0,
            });
            if holder.workflow_id == workflow_id {
                self.broker.del(&key).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;

    fn service() -> (PoLockService, Arc<InMemoryBroker>) {
        let broker = Arc::new(InMemoryBroker::new());
        (PoLockService::new(broker.clone()), broker)
    }

    async fn plant_lock(broker: &InMemoryBroker, po_id: Uuid, workflow_id: &str, age_ms: i64) {
        let record = LockRecord {
            workflow_id: workflow_id.to_string(),
            acquired_at_ms: Utc::now().timestamp_millis() - age_ms,
        };
        broker
            .set_px(
                &lock_key(po_id),
                &serde_json::to_string(&record).unwrap(),
                LOCK_TTL_MS,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn free_lock_is_acquired_immediately() {
        let (locks, _) = service();
        let po = Uuid::now_v7();
        locks.acquire(po, "wf_a").await.unwrap();
        // Re-entrant for the same workflow
        locks.acquire(po, "wf_a").await.unwrap();
    }

    #[tokio::test]
    async fn stale_holder_is_reclaimed() {
        let (locks, broker) = service();
        let po = Uuid::now_v7();
        plant_lock(&broker, po, "wf_crashed", 31_000).await;

        locks.acquire(po, "wf_b").await.unwrap();
        let held = broker.get(&lock_key(po)).await.unwrap().unwrap();
        let record: LockRecord = serde_json::from_str(&held).unwrap();
        assert_eq!(record.workflow_id, "wf_b");
    }

    #[tokio::test(start_paused = true)]
    async fn live_holder_wins_and_the_waiter_times_out() {
        let (locks, broker) = service();
        let po = Uuid::now_v7();
        plant_lock(&broker, po, "wf_live", 0).await;

        let result = locks.acquire(po, "wf_b").await;
        assert!(matches!(result, Err(StockflowError::LockContended(id)) if id == po));
    }

    #[tokio::test]
    async fn release_is_holder_scoped() {
        let (locks, broker) = service();
        let po = Uuid::now_v7();
        locks.acquire(po, "wf_a").await.unwrap();

        // Someone else's release is a no-op
        locks.release(po, "wf_b").await.unwrap();
        assert!(broker.get(&lock_key(po)).await.unwrap().is_some());

        locks.release(po, "wf_a").await.unwrap();
        assert!(broker.get(&lock_key(po)).await.unwrap().is_none());
    }
}
