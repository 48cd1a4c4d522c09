// Stage processors
//
// One processor per pipeline stage. Each is a pure function of the previous
// stage's payload plus identifiers: it reads the blob, does its work, and
// returns the next blob. Re-entry is safe everywhere — processors either
// short-circuit on already-complete state or redo idempotently.

pub mod ai_enrichment;
pub mod ai_parsing;
pub mod data_normalization;
pub mod database_save;
pub mod image_attachment;
pub mod merchant_config;
pub mod product_draft_creation;
pub mod shopify_payload;
pub mod shopify_sync;
pub mod status_update;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use stockflow_core::{Result, Stage, StageOutcome, StagePayload, StockflowError};
use stockflow_storage::WorkflowExecutionRow;

use crate::context::WorkerContext;

#[async_trait]
pub trait StageProcessor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(
        &self,
        ctx: &WorkerContext,
        workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome>;
}

/// All ten processors, keyed by stage
pub struct ProcessorSet {
    inner: HashMap<Stage, Arc<dyn StageProcessor>>,
}

impl ProcessorSet {
    pub fn standard() -> Self {
        let processors: Vec<Arc<dyn StageProcessor>> = vec![
            Arc::new(ai_parsing::AiParsingProcessor),
            Arc::new(database_save::DatabaseSaveProcessor),
            Arc::new(data_normalization::DataNormalizationProcessor),
            Arc::new(merchant_config::MerchantConfigProcessor),
            Arc::new(ai_enrichment::AiEnrichmentProcessor),
            Arc::new(shopify_payload::ShopifyPayloadProcessor),
            Arc::new(product_draft_creation::ProductDraftCreationProcessor),
            Arc::new(image_attachment::ImageAttachmentProcessor),
            Arc::new(shopify_sync::ShopifySyncProcessor),
            Arc::new(status_update::StatusUpdateProcessor),
        ];
        Self {
            inner: processors.into_iter().map(|p| (p.stage(), p)).collect(),
        }
    }

    pub fn get(&self, stage: Stage) -> Result<Arc<dyn StageProcessor>> {
        self.inner
            .get(&stage)
            .cloned()
            .ok_or_else(|| StockflowError::fatal(format!("no processor registered for {stage}")))
    }
}

/// The stage payload did not match the stage being executed — a corrupted
/// or mis-keyed stage store entry
pub(crate) fn payload_mismatch(stage: Stage, payload: &StagePayload) -> StockflowError {
    StockflowError::validation(format!(
        "stage {stage} received a payload for {}",
        payload.stage()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stage_has_a_processor() {
        let set = ProcessorSet::standard();
        for stage in Stage::ALL {
            assert!(set.get(stage).is_ok(), "missing processor for {stage}");
        }
    }
}
