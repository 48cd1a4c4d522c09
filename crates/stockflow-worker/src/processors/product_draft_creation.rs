// Stage 7: one product draft per line item
//
// `line_item_id` is unique on drafts, so re-running this stage converges on
// the same rows instead of minting duplicates. A merchant with no session
// record gets a temporary one rather than a failed stage.

use async_trait::async_trait;
use tracing::info;

use stockflow_core::{Result, Stage, StageOutcome, StagePayload, StockflowError};
use stockflow_storage::{UpsertProductDraft, WorkflowExecutionRow};

use crate::context::WorkerContext;
use crate::processors::{payload_mismatch, StageProcessor};

pub struct ProductDraftCreationProcessor;

#[async_trait]
impl StageProcessor for ProductDraftCreationProcessor {
    fn stage(&self) -> Stage {
        Stage::ProductDraftCreation
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome> {
        let StagePayload::ProductDraftCreation {
            merchant_id,
            purchase_order_id,
            payloads,
        } = input
        else {
            return Err(payload_mismatch(self.stage(), &input));
        };

        let session = match ctx
            .db
            .find_session(merchant_id)
            .await
            .map_err(StockflowError::Internal)?
        {
            Some(session) => session,
            None => {
                info!(
                    merchant_id = %merchant_id,
                    workflow_id = %workflow.workflow_id,
                    "no merchant session, creating a temporary one"
                );
                ctx.db
                    .create_session(merchant_id, "temporary")
                    .await
                    .map_err(StockflowError::Internal)?
            }
        };

        let supplier_id = ctx
            .db
            .get_purchase_order(purchase_order_id)
            .await
            .map_err(StockflowError::Internal)?
            .and_then(|po| po.supplier_id);

        let mut draft_ids = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            let draft = ctx
                .db
                .upsert_product_draft(UpsertProductDraft {
                    merchant_id,
                    session_id: session.id,
                    purchase_order_id,
                    line_item_id: payload.line_item_id,
                    supplier_id,
                    original_title: payload.original_title.clone(),
                    refined_title: payload.refined_title.clone(),
                    original_description: payload.original_description.clone(),
                    refined_description: payload.refined_description.clone(),
                    original_price: payload.original_price,
                    price_refined: payload.price_refined,
                    tags: payload.tags.clone(),
                    category_id: payload.category.clone(),
                })
                .await
                .map_err(StockflowError::Internal)?;
            draft_ids.push(draft.id);
        }

        Ok(StageOutcome {
            next: Some(StagePayload::ImageAttachment {
                merchant_id,
                purchase_order_id,
                draft_ids: draft_ids.clone(),
            }),
            purchase_order_id: Some(purchase_order_id),
            merchant_id,
            message: format!("{} product drafts ready", draft_ids.len()),
        })
    }
}
