// Stage 10: terminal write
//
// Marks the purchase order completed, drops the workflow's stage store
// entries and publishes the completion event. Idempotent: re-running
// against an already-completed order changes nothing.

use async_trait::async_trait;

use stockflow_core::{
    EventKind, ProgressEvent, Result, Stage, StageOutcome, StagePayload, StockflowError,
};
use stockflow_storage::{PoStatus, WorkflowExecutionRow};

use crate::context::WorkerContext;
use crate::processors::{payload_mismatch, StageProcessor};

pub struct StatusUpdateProcessor;

#[async_trait]
impl StageProcessor for StatusUpdateProcessor {
    fn stage(&self) -> Stage {
        Stage::StatusUpdate
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome> {
        let StagePayload::StatusUpdate {
            merchant_id,
            purchase_order_id,
            synced_product_ids,
        } = input
        else {
            return Err(payload_mismatch(self.stage(), &input));
        };

        ctx.db
            .update_po_status(purchase_order_id, PoStatus::Completed, Some("completed"))
            .await
            .map_err(StockflowError::Internal)?;

        ctx.db
            .clear_stage_data(&workflow.workflow_id)
            .await
            .map_err(StockflowError::Internal)?;

        ctx.bus
            .publish(
                merchant_id,
                EventKind::Completion,
                &ProgressEvent::new("workflow_completed", self.stage().queue_name(), 100)
                    .with_workflow(&workflow.workflow_id)
                    .with_po(purchase_order_id)
                    .with_message(format!(
                        "Workflow complete, {} products synced",
                        synced_product_ids.len()
                    )),
            )
            .await;

        Ok(StageOutcome {
            next: None,
            purchase_order_id: Some(purchase_order_id),
            merchant_id,
            message: "workflow completed".to_string(),
        })
    }
}
