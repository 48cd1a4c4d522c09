// Stage 5: optional LLM enrichment of titles and descriptions

use async_trait::async_trait;

use stockflow_core::{Result, Stage, StageOutcome, StagePayload};
use stockflow_storage::WorkflowExecutionRow;

use crate::context::WorkerContext;
use crate::processors::{payload_mismatch, StageProcessor};

pub struct AiEnrichmentProcessor;

#[async_trait]
impl StageProcessor for AiEnrichmentProcessor {
    fn stage(&self) -> Stage {
        Stage::AiEnrichment
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        _workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome> {
        let StagePayload::AiEnrichment {
            merchant_id,
            purchase_order_id,
            items,
        } = input
        else {
            return Err(payload_mismatch(self.stage(), &input));
        };

        // Pass-through on any enrichment failure; the client already
        // degrades to the unmodified items
        let items = ctx.enrichment.enrich(items).await;
        let enriched = items.iter().filter(|i| i.refined_title.is_some()).count();

        Ok(StageOutcome {
            next: Some(StagePayload::ShopifyPayload {
                merchant_id,
                purchase_order_id,
                items,
            }),
            purchase_order_id: Some(purchase_order_id),
            merchant_id,
            message: format!("{enriched} items enriched"),
        })
    }
}
