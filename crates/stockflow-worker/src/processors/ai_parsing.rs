// Stage 1: document extraction

use async_trait::async_trait;
use tracing::info;

use stockflow_core::{
    EventKind, ProgressEvent, Result, Stage, StageOutcome, StagePayload, StockflowError,
};
use stockflow_storage::WorkflowExecutionRow;

use crate::context::WorkerContext;
use crate::processors::{payload_mismatch, StageProcessor};

pub struct AiParsingProcessor;

#[async_trait]
impl StageProcessor for AiParsingProcessor {
    fn stage(&self) -> Stage {
        Stage::AiParsing
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome> {
        let StagePayload::AiParsing {
            upload_id,
            merchant_id,
        } = input
        else {
            return Err(payload_mismatch(self.stage(), &input));
        };

        let upload = ctx
            .db
            .get_upload(upload_id)
            .await
            .map_err(StockflowError::Internal)?
            .ok_or_else(|| StockflowError::business(format!("upload {upload_id} not found")))?;

        let (document, confidence) = ctx.extraction.extract(&upload).await?;

        info!(
            workflow_id = %workflow.workflow_id,
            upload_id = %upload_id,
            line_items = document.line_items.len(),
            "extraction complete"
        );
        ctx.bus
            .publish(
                merchant_id,
                EventKind::Progress,
                &ProgressEvent::new("extraction_complete", self.stage().queue_name(), 15)
                    .with_workflow(&workflow.workflow_id)
                    .with_message(format!(
                        "Extracted {} line items from {}",
                        document.line_items.len(),
                        upload.file_name
                    )),
            )
            .await;

        Ok(StageOutcome {
            next: Some(StagePayload::DatabaseSave {
                upload_id,
                merchant_id,
                document,
                confidence,
            }),
            purchase_order_id: workflow.purchase_order_id,
            merchant_id,
            message: "document extracted".to_string(),
        })
    }
}
