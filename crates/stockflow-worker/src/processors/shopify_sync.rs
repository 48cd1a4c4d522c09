// Stage 9: push drafts to the commerce platform
//
// At-least-once: already-synced drafts short-circuit on their external id,
// fresh ones are created, previously-created ones are updated in place. A
// transient platform failure fails the stage (retryable); a rejection marks
// just that draft failed and moves on.

use async_trait::async_trait;
use tracing::warn;

use stockflow_core::{Result, Stage, StageOutcome, StagePayload, StockflowError};
use stockflow_storage::{DraftStatus, WorkflowExecutionRow};

use crate::context::WorkerContext;
use crate::processors::{payload_mismatch, StageProcessor};

pub struct ShopifySyncProcessor;

#[async_trait]
impl StageProcessor for ShopifySyncProcessor {
    fn stage(&self) -> Stage {
        Stage::ShopifySync
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        _workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome> {
        let StagePayload::ShopifySync {
            merchant_id,
            purchase_order_id,
            draft_ids,
        } = input
        else {
            return Err(payload_mismatch(self.stage(), &input));
        };

        let drafts = ctx
            .db
            .list_drafts_by_ids(&draft_ids)
            .await
            .map_err(StockflowError::Internal)?;

        let mut synced_product_ids = Vec::new();
        let mut transient_failures = 0usize;

        for draft in &drafts {
            // Re-entry short-circuit: this draft already made it out
            if draft.status == "SYNCED" {
                if let Some(external_id) = &draft.external_product_id {
                    synced_product_ids.push(external_id.clone());
                    continue;
                }
            }

            ctx.db
                .update_draft_status(draft.id, DraftStatus::Syncing)
                .await
                .map_err(StockflowError::Internal)?;
            let images = ctx
                .db
                .list_draft_images(draft.id)
                .await
                .map_err(StockflowError::Internal)?;

            match ctx.shopify.upsert_product(draft, &images).await {
                Ok((product_id, variant_id)) => {
                    ctx.db
                        .set_draft_external_ids(draft.id, &product_id, variant_id.as_deref())
                        .await
                        .map_err(StockflowError::Internal)?;
                    synced_product_ids.push(product_id);
                }
                Err(e) if e.is_retryable() => {
                    warn!(draft_id = %draft.id, error = %e, "transient platform failure");
                    transient_failures += 1;
                }
                Err(e) => {
                    warn!(draft_id = %draft.id, error = %e, "draft rejected by platform");
                    ctx.db
                        .update_draft_status(draft.id, DraftStatus::Failed)
                        .await
                        .map_err(StockflowError::Internal)?;
                }
            }
        }

        if transient_failures > 0 {
            // Retry the stage; synced drafts will short-circuit next pass
            return Err(StockflowError::transient(format!(
                "{transient_failures} drafts hit transient platform errors"
            )));
        }

        Ok(StageOutcome {
            next: Some(StagePayload::StatusUpdate {
                merchant_id,
                purchase_order_id,
                synced_product_ids: synced_product_ids.clone(),
            }),
            purchase_order_id: Some(purchase_order_id),
            merchant_id,
            message: format!("{} drafts synced", synced_product_ids.len()),
        })
    }
}
