// Cron driver: periodic reconciliation of workflows the queues dropped
//
// Single-writer via a broker lease. The skip-forward rule is mode-aware and
// the two modes need OPPOSITE handling: a sequential workflow with line
// items still owes stages 3..10 and must be resumed, while a queued
// workflow with line items on its purchase order provably finished stage 2
// and may be advanced past it.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use stockflow_core::{Result, Stage, StagePayload, StockflowError};
use stockflow_storage::{ExecutionMode, WorkflowExecutionRow};

use crate::orchestrator::{Orchestrator, MAX_STAGE_RETRIES};

const LEASE_KEY: &str = "cron:reconcile";
const LEASE_TTL_MS: u64 = 55_000;
const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// No progress write for this long means the queue substrate lost the job
const STUCK_THRESHOLD_SECS: i64 = 120;

/// Tail-latency bound: at most this many workflows per tick
const MAX_PER_TICK: i64 = 20;

pub struct CronDriver {
    orchestrator: Arc<Orchestrator>,
}

impl CronDriver {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self { orchestrator })
    }

    /// Run ticks forever; aborted on shutdown
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let driver = self;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK_INTERVAL).await;
                match driver.tick().await {
                    Ok(0) => {}
                    Ok(n) => info!(reconciled = n, "cron tick reconciled workflows"),
                    Err(e) => warn!(error = %e, "cron tick failed"),
                }
            }
        })
    }

    /// One reconcile pass under the global lease
    pub async fn tick(&self) -> Result<usize> {
        let broker = self.orchestrator.context().queues.broker();
        let lease_id = format!("cron_{}", Uuid::now_v7().simple());
        if !broker.set_nx_px(LEASE_KEY, &lease_id, LEASE_TTL_MS).await? {
            // Another instance holds the lease this minute
            return Ok(0);
        }

        let result = self.reconcile().await;

        if let Ok(Some(held)) = broker.get(LEASE_KEY).await {
            if held == lease_id {
                broker.del(LEASE_KEY).await.ok();
            }
        }
        result
    }

    async fn reconcile(&self) -> Result<usize> {
        let ctx = self.orchestrator.context();
        let stuck = ctx
            .db
            .list_stuck_workflows(STUCK_THRESHOLD_SECS, MAX_PER_TICK)
            .await
            .map_err(StockflowError::Internal)?;

        let mut reconciled = 0;
        for workflow in stuck {
            match self.reconcile_one(&workflow).await {
                Ok(()) => reconciled += 1,
                Err(e) => warn!(
                    workflow_id = %workflow.workflow_id,
                    error = %e,
                    "reconcile failed for workflow"
                ),
            }
        }
        Ok(reconciled)
    }

    async fn reconcile_one(&self, workflow: &WorkflowExecutionRow) -> Result<()> {
        let ctx = self.orchestrator.context();
        let workflow_id = workflow.workflow_id.as_str();
        let stage = Stage::from_queue_name(&workflow.current_stage).ok_or_else(|| {
            StockflowError::validation(format!(
                "workflow {workflow_id} points at unknown stage {}",
                workflow.current_stage
            ))
        })?;

        // Retry budget already spent: the workflow is done for
        if workflow.retry_count(stage.queue_name()) >= MAX_STAGE_RETRIES {
            warn!(workflow_id, stage = %stage, "stuck with exhausted retries, failing");
            self.orchestrator
                .fail_workflow(workflow_id, stage, "retry budget exhausted while stuck")
                .await;
            return Ok(());
        }

        match ExecutionMode::from_str(&workflow.execution_mode) {
            // Sequential: line items prove stage 2 ran, but stages 3..10
            // still owe their work in THIS workflow. Resume, never skip.
            ExecutionMode::Sequential => {
                info!(workflow_id, stage = %stage, "resuming stuck sequential workflow");
                self.orchestrator.enqueue_stage(workflow_id, stage, None).await
            }
            ExecutionMode::Queued => {
                if stage.index() <= Stage::DatabaseSave.index() {
                    if let Some(po_id) = workflow.purchase_order_id {
                        let line_items = ctx
                            .db
                            .list_line_items(po_id)
                            .await
                            .map_err(StockflowError::Internal)?;
                        if !line_items.is_empty() {
                            // Auto-fix: stage 2 completed but its success
                            // write was lost; advance the pointer
                            info!(
                                workflow_id,
                                po_id = %po_id,
                                "line items present, advancing stuck workflow past database_save"
                            );
                            let next = StagePayload::DataNormalization {
                                merchant_id: workflow.merchant_id,
                                purchase_order_id: po_id,
                                line_item_ids: line_items.iter().map(|li| li.id).collect(),
                            };
                            ctx.db
                                .put_stage_data(
                                    workflow_id,
                                    Stage::DataNormalization.queue_name(),
                                    &serde_json::to_value(&next).expect("payload serializes"),
                                )
                                .await
                                .map_err(StockflowError::Internal)?;
                            ctx.db
                                .update_workflow_progress(
                                    workflow_id,
                                    Stage::DataNormalization.queue_name(),
                                    Stage::DataNormalization.entry_progress() as i32,
                                    Some(po_id),
                                )
                                .await
                                .map_err(StockflowError::Internal)?;
                            return self
                                .orchestrator
                                .enqueue_stage(workflow_id, Stage::DataNormalization, None)
                                .await;
                        }
                    }
                }
                info!(workflow_id, stage = %stage, "re-enqueueing stuck queued workflow");
                self.orchestrator.enqueue_stage(workflow_id, stage, None).await
            }
        }
    }
}
