// Workflow orchestrator
//
// Owns the lifecycle of a workflow: dedup on start, stage-by-stage
// execution with audits and progress writes, retry budgets, the purchase
// order advisory lock, and the terminal status write. Queued mode hops
// between invocations via the stage queues; sequential mode chains stages
// in-process (see sequential.rs).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use stockflow_core::{
    EventKind, ProgressEvent, Result, Stage, StageOutcome, StagePayload, StockflowError,
};
use stockflow_queue::{Job, JobHandler};
use stockflow_storage::{
    with_retries, CreateWorkflowExecution, ExecutionMode, PoStatus, RetryOptions,
    WorkflowExecutionRow, WorkflowStatus,
};

use crate::context::WorkerContext;
use crate::processors::ProcessorSet;
use crate::sequential::{self, SequentialOutcome};

/// Overlapping start requests inside this window return the existing id
const DEDUP_WINDOW_SECS: i64 = 60;

/// Per-stage retry budget (attempts beyond the first)
pub(crate) const MAX_STAGE_RETRIES: u32 = 2;
const RETRY_BASE_DELAY_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct StartWorkflowRequest {
    pub upload_id: Uuid,
    pub merchant_id: Uuid,
    pub metadata: serde_json::Value,
}

/// Queue payload for a stage job
#[derive(Debug, Serialize, Deserialize)]
struct StageJob {
    workflow_id: String,
}

pub struct Orchestrator {
    ctx: Arc<WorkerContext>,
    processors: ProcessorSet,
}

impl Orchestrator {
    pub fn new(ctx: Arc<WorkerContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            processors: ProcessorSet::standard(),
        })
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Start (or join) the workflow for an upload
    pub async fn start_workflow(&self, request: StartWorkflowRequest) -> Result<String> {
        // Dedup: one in-flight workflow per upload per window
        if let Some(existing) = self
            .ctx
            .db
            .find_recent_workflow_for_upload(
                request.upload_id,
                request.merchant_id,
                DEDUP_WINDOW_SECS,
            )
            .await
            .map_err(StockflowError::Internal)?
        {
            info!(
                workflow_id = %existing.workflow_id,
                upload_id = %request.upload_id,
                "duplicate start within the dedup window, returning existing workflow"
            );
            return Ok(existing.workflow_id);
        }

        let settings = self
            .ctx
            .db
            .merchant_settings(request.merchant_id)
            .await
            .unwrap_or_default();
        let mode = if settings
            .enable_sequential_workflow
            .unwrap_or(self.ctx.config.sequential_workflow)
        {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Queued
        };

        let workflow_id = format!("wf_{}", Uuid::now_v7().simple());
        self.ctx
            .db
            .create_workflow_execution(CreateWorkflowExecution {
                workflow_id: workflow_id.clone(),
                merchant_id: request.merchant_id,
                upload_id: Some(request.upload_id),
                execution_mode: mode,
                metadata: request.metadata,
            })
            .await
            .map_err(StockflowError::Internal)?;

        let seed = StagePayload::AiParsing {
            upload_id: request.upload_id,
            merchant_id: request.merchant_id,
        };
        with_retries("seed stage store", RetryOptions::standard(), || {
            let db = self.ctx.db.clone();
            let workflow_id = workflow_id.clone();
            let value = serde_json::to_value(&seed).expect("payload serializes");
            async move {
                db.put_stage_data(&workflow_id, Stage::AiParsing.queue_name(), &value)
                    .await
            }
        })
        .await?;

        self.enqueue_stage(&workflow_id, Stage::AiParsing, None).await?;

        info!(
            workflow_id = %workflow_id,
            merchant_id = %request.merchant_id,
            mode = mode.as_str(),
            "workflow started"
        );
        Ok(workflow_id)
    }

    /// Entry point for a queue job on any stage queue
    pub async fn handle_stage_job(&self, workflow_id: &str, stage: Stage) -> Result<()> {
        let Some(workflow) = self
            .ctx
            .db
            .get_workflow(workflow_id)
            .await
            .map_err(StockflowError::Internal)?
        else {
            warn!(workflow_id, "stage job for unknown workflow, dropping");
            return Ok(());
        };

        match ExecutionMode::from_str(&workflow.execution_mode) {
            ExecutionMode::Sequential => {
                match sequential::run_from(self, &workflow, stage).await? {
                    SequentialOutcome::Completed => {}
                    SequentialOutcome::Deferred { stage } => {
                        info!(
                            workflow_id,
                            stage = %stage,
                            "sequential budget exhausted, remainder deferred to queued mode"
                        );
                    }
                    SequentialOutcome::Failed => {}
                }
                Ok(())
            }
            ExecutionMode::Queued => {
                match self.execute_stage(workflow_id, stage, None).await {
                    Ok(outcome) => {
                        if let Some(next) = outcome.next.as_ref() {
                            self.enqueue_stage(workflow_id, next.stage(), None).await?;
                        }
                        Ok(())
                    }
                    Err(e) => {
                        self.handle_stage_failure(workflow_id, stage, &e).await;
                        Ok(())
                    }
                }
            }
        }
    }

    /// Execute one stage: audit, input, lock, processor, state writes.
    /// `input_override` lets sequential mode thread the previous outcome
    /// instead of re-reading the stage store.
    pub async fn execute_stage(
        &self,
        workflow_id: &str,
        stage: Stage,
        input_override: Option<StagePayload>,
    ) -> Result<StageOutcome> {
        let ctx = &self.ctx;
        let workflow = ctx
            .db
            .get_workflow(workflow_id)
            .await
            .map_err(StockflowError::Internal)?
            .ok_or_else(|| StockflowError::business(format!("workflow {workflow_id} not found")))?;

        // Cooperative cancellation: a terminal status write is the signal
        match WorkflowStatus::from_str(&workflow.status) {
            WorkflowStatus::Completed | WorkflowStatus::Failed => {
                return Err(StockflowError::WorkflowCancelled(workflow_id.to_string()));
            }
            WorkflowStatus::Pending | WorkflowStatus::Processing => {}
        }

        let input = match input_override {
            Some(payload) => payload,
            None => self.load_stage_input(&workflow, stage).await?,
        };
        if input.stage() != stage {
            return Err(StockflowError::validation(format!(
                "stage store for {workflow_id} holds {} where {stage} was expected",
                input.stage()
            )));
        }

        let progress = stage.entry_progress() as i32;
        let audit_id = ctx
            .db
            .start_stage_execution(workflow_id, stage.queue_name(), progress)
            .await
            .map_err(StockflowError::Internal)?;
        with_retries("stage entry write", RetryOptions::standard(), || {
            let db = ctx.db.clone();
            let po = input.purchase_order_id();
            async move {
                db.update_workflow_progress(workflow_id, stage.queue_name(), progress, po)
                    .await
            }
        })
        .await?;

        ctx.bus
            .publish(
                workflow.merchant_id,
                EventKind::Stage,
                &ProgressEvent::new("stage_started", stage.queue_name(), stage.entry_progress())
                    .with_workflow(workflow_id)
                    .with_message(format!("Stage {stage} started")),
            )
            .await;

        // Mutating stages serialize on the purchase order
        let lock_po = if stage.mutates_purchase_order() {
            input.purchase_order_id().or(workflow.purchase_order_id)
        } else {
            None
        };
        if let Some(po_id) = lock_po {
            if let Err(e) = ctx.locks.acquire(po_id, workflow_id).await {
                ctx.db
                    .fail_stage_execution(audit_id, &e.to_string())
                    .await
                    .ok();
                return Err(e);
            }
        }

        let processor = self.processors.get(stage)?;
        let result = processor.run(ctx, &workflow, input).await;

        if let Some(po_id) = lock_po {
            if let Err(e) = ctx.locks.release(po_id, workflow_id).await {
                warn!(workflow_id, po_id = %po_id, error = %e, "lock release failed");
            }
        }

        match result {
            Ok(outcome) => {
                self.commit_stage(&workflow, stage, audit_id, &outcome).await?;
                Ok(outcome)
            }
            Err(e) => {
                ctx.db
                    .fail_stage_execution(audit_id, &e.to_string())
                    .await
                    .ok();
                Err(e)
            }
        }
    }

    async fn load_stage_input(
        &self,
        workflow: &WorkflowExecutionRow,
        stage: Stage,
    ) -> Result<StagePayload> {
        let stored = self
            .ctx
            .db
            .get_stage_data(&workflow.workflow_id, stage.queue_name())
            .await
            .map_err(StockflowError::Internal)?;
        match stored {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                StockflowError::validation(format!(
                    "corrupt stage blob for {} at {stage}: {e}",
                    workflow.workflow_id
                ))
            }),
            // A brand-new workflow may race its seed write; stage 1 input is
            // reconstructible from the execution row itself
            None if stage == Stage::AiParsing => Ok(StagePayload::AiParsing {
                upload_id: workflow.upload_id.ok_or_else(|| {
                    StockflowError::validation("workflow has no upload to parse")
                })?,
                merchant_id: workflow.merchant_id,
            }),
            None => Err(StockflowError::validation(format!(
                "no stage input for {} at {stage}",
                workflow.workflow_id
            ))),
        }
    }

    async fn commit_stage(
        &self,
        workflow: &WorkflowExecutionRow,
        stage: Stage,
        audit_id: i64,
        outcome: &StageOutcome,
    ) -> Result<()> {
        let ctx = &self.ctx;
        let workflow_id = workflow.workflow_id.as_str();

        match &outcome.next {
            Some(next) => {
                let next_stage = next.stage();
                with_retries("stage store write", RetryOptions::standard(), || {
                    let db = ctx.db.clone();
                    let value = serde_json::to_value(next).expect("payload serializes");
                    async move {
                        db.put_stage_data(workflow_id, next_stage.queue_name(), &value)
                            .await
                    }
                })
                .await?;
                with_retries("stage pointer write", RetryOptions::standard(), || {
                    let db = ctx.db.clone();
                    let po = outcome.purchase_order_id;
                    async move {
                        db.update_workflow_progress(
                            workflow_id,
                            next_stage.queue_name(),
                            next_stage.entry_progress() as i32,
                            po,
                        )
                        .await
                    }
                })
                .await?;
            }
            None => {
                ctx.db
                    .set_workflow_status(workflow_id, WorkflowStatus::Completed, 100)
                    .await
                    .map_err(StockflowError::Internal)?;
            }
        }

        ctx.db
            .complete_stage_execution(audit_id, stage.entry_progress() as i32)
            .await
            .map_err(StockflowError::Internal)?;

        ctx.bus
            .publish(
                workflow.merchant_id,
                EventKind::Progress,
                &ProgressEvent::new("stage_completed", stage.queue_name(), stage.entry_progress())
                    .with_workflow(workflow_id)
                    .with_message(format!("Stage {stage} complete: {}", outcome.message)),
            )
            .await;
        Ok(())
    }

    /// Classify a stage failure into retry-or-fail
    pub async fn handle_stage_failure(
        &self,
        workflow_id: &str,
        stage: Stage,
        err: &StockflowError,
    ) {
        if matches!(err, StockflowError::WorkflowCancelled(_)) {
            info!(workflow_id, stage = %stage, "stage skipped, workflow already terminal");
            return;
        }

        // Budget check runs against the count as it stands; the counter only
        // moves when a retry is actually scheduled, so the persisted value
        // never exceeds the budget on a terminal transition
        let spent = match self.ctx.db.get_workflow(workflow_id).await {
            Ok(Some(workflow)) => workflow.retry_count(stage.queue_name()),
            Ok(None) => {
                warn!(workflow_id, "failure for unknown workflow, dropping");
                return;
            }
            Err(e) => {
                error!(workflow_id, error = %e, "retry bookkeeping failed");
                MAX_STAGE_RETRIES
            }
        };

        if err.is_retryable() && spent < MAX_STAGE_RETRIES {
            // 5 s, then 10 s
            let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << spent.min(4));
            if let Err(e) = self
                .ctx
                .db
                .bump_retry_count(workflow_id, stage.queue_name())
                .await
            {
                error!(workflow_id, error = %e, "retry bookkeeping failed");
            }
            warn!(
                workflow_id,
                stage = %stage,
                attempt = spent + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "stage failed, rescheduling"
            );
            if let Err(e) = self.enqueue_stage(workflow_id, stage, Some(delay)).await {
                error!(workflow_id, error = %e, "retry enqueue failed");
            }
            return;
        }

        error!(workflow_id, stage = %stage, error = %err, "workflow failed");
        self.fail_workflow(workflow_id, stage, &err.to_string()).await;
    }

    /// Terminal failure: status writes plus the error event
    pub async fn fail_workflow(&self, workflow_id: &str, stage: Stage, reason: &str) {
        let ctx = &self.ctx;
        let Ok(Some(workflow)) = ctx.db.get_workflow(workflow_id).await else {
            return;
        };

        if let Err(e) = ctx
            .db
            .set_workflow_status(workflow_id, WorkflowStatus::Failed, workflow.progress_percent)
            .await
        {
            error!(workflow_id, error = %e, "terminal status write failed");
        }

        // A purchase order that never reached review stays failed; one that
        // did keeps review_needed for manual follow-up
        if let Some(po_id) = workflow.purchase_order_id {
            if let Ok(Some(po)) = ctx.db.get_purchase_order(po_id).await {
                if po.status == PoStatus::Processing.as_str() {
                    ctx.db
                        .update_po_status(po_id, PoStatus::Failed, Some("workflow_failed"))
                        .await
                        .ok();
                }
            }
        }

        ctx.bus
            .publish(
                workflow.merchant_id,
                EventKind::Error,
                &ProgressEvent::new("workflow_failed", stage.queue_name(), workflow.progress_percent as u8)
                    .with_workflow(workflow_id)
                    .with_message(format!("Workflow failed at {stage}: {reason}")),
            )
            .await;
    }

    /// Enqueue a stage job on its queue
    pub async fn enqueue_stage(
        &self,
        workflow_id: &str,
        stage: Stage,
        delay: Option<Duration>,
    ) -> Result<()> {
        let payload = serde_json::to_value(StageJob {
            workflow_id: workflow_id.to_string(),
        })
        .expect("stage job serializes");
        self.ctx
            .queues
            .enqueue(stage.queue_name(), payload, delay)
            .await?;
        Ok(())
    }

    /// Register a handler on every stage queue
    pub async fn register_queues(self: Arc<Self>) {
        for stage in Stage::ALL {
            let handler = Arc::new(StageQueueHandler {
                orchestrator: self.clone(),
                stage,
            });
            self.ctx.queues.register(stage.queue_name(), handler).await;
        }
    }
}

struct StageQueueHandler {
    orchestrator: Arc<Orchestrator>,
    stage: Stage,
}

#[async_trait]
impl JobHandler for StageQueueHandler {
    async fn handle(&self, job: Job) -> Result<()> {
        let stage_job: StageJob = serde_json::from_value(job.payload).map_err(|e| {
            StockflowError::validation(format!("malformed stage job on {}: {e}", self.stage))
        })?;
        self.orchestrator
            .handle_stage_job(&stage_job.workflow_id, self.stage)
            .await
    }
}
