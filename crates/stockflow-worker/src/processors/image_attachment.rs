// Stage 8: attach image candidates to drafts
//
// One "Brand Model" query per draft; per-query failures are tolerated and
// an empty image set is acceptable.

use async_trait::async_trait;
use tracing::warn;

use stockflow_core::{Result, Stage, StageOutcome, StagePayload, StockflowError};
use stockflow_storage::{CreateProductImage, WorkflowExecutionRow};

use crate::context::WorkerContext;
use crate::processors::{payload_mismatch, StageProcessor};

/// The search query for a product title: the leading brand/model tokens
/// before any pack-size noise
pub fn brand_model_query(title: &str) -> String {
    title
        .split(|c: char| c == '-' || c == '(' || c == ',')
        .next()
        .unwrap_or(title)
        .split_whitespace()
        .take(4)
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct ImageAttachmentProcessor;

#[async_trait]
impl StageProcessor for ImageAttachmentProcessor {
    fn stage(&self) -> Stage {
        Stage::ImageAttachment
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        _workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome> {
        let StagePayload::ImageAttachment {
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

        let mut attached = 0usize;
        for draft in &drafts {
            let query = brand_model_query(
                draft.refined_title.as_deref().unwrap_or(&draft.original_title),
            );
            match ctx.image_search.search(&query).await {
                Ok(candidates) if !candidates.is_empty() => {
                    let images: Vec<CreateProductImage> = candidates
                        .into_iter()
                        .enumerate()
                        .map(|(position, c)| CreateProductImage {
                            draft_id: draft.id,
                            url: c.url,
                            source_domain: c.source_domain,
                            confidence: c.confidence,
                            position: position as i32,
                        })
                        .collect();
                    ctx.db
                        .replace_draft_images(draft.id, &images)
                        .await
                        .map_err(StockflowError::Internal)?;
                    attached += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(draft_id = %draft.id, query, error = %e, "image search failed for draft");
                }
            }
        }

        Ok(StageOutcome {
            next: Some(StagePayload::ShopifySync {
                merchant_id,
                purchase_order_id,
                draft_ids: draft_ids.clone(),
            }),
            purchase_order_id: Some(purchase_order_id),
            merchant_id,
            message: format!("images attached to {attached} of {} drafts", draft_ids.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_drops_pack_size_noise() {
        assert_eq!(brand_model_query("Widget A - Case of 12"), "Widget A");
        assert_eq!(brand_model_query("DeWalt DCD777 Drill (2-Pack)"), "DeWalt DCD777 Drill");
        assert_eq!(brand_model_query("Plain"), "Plain");
    }
}
