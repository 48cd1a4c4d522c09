// Stage 2: persist the extracted document
//
// Supplier resolution and quantity normalization run BEFORE the bounded
// transaction; the transaction itself lives in the purchase order writer.

use async_trait::async_trait;
use tracing::warn;

use stockflow_core::extraction::post_process;
use stockflow_core::{Result, Stage, StageOutcome, StagePayload, StockflowError};
use stockflow_matching::{MatchAction, MatchRequest};
use stockflow_storage::{PersistRequest, PoStatus, WorkflowExecutionRow};

use crate::context::WorkerContext;
use crate::processors::{payload_mismatch, StageProcessor};

pub struct DatabaseSaveProcessor;

#[async_trait]
impl StageProcessor for DatabaseSaveProcessor {
    fn stage(&self) -> Stage {
        Stage::DatabaseSave
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome> {
        let StagePayload::DatabaseSave {
            upload_id,
            merchant_id,
            mut document,
            confidence,
        } = input
        else {
            return Err(payload_mismatch(self.stage(), &input));
        };

        // Re-entry safe: the heuristics only fire on quantity == 1
        post_process(&mut document);

        // Supplier resolution can take seconds; strictly pre-transaction.
        // A resolver failure downgrades to an unlinked purchase order
        // rather than losing the document.
        let supplier_id = if document.supplier.is_empty() {
            None
        } else {
            match ctx
                .resolver
                .find_matching_suppliers(MatchRequest {
                    merchant_id,
                    stub: document.supplier.clone(),
                    engine_override: None,
                    create_if_no_match: true,
                    purchase_order_id: None,
                })
                .await
            {
                Ok(outcome) => match outcome.action {
                    MatchAction::AutoLinked { supplier_id }
                    | MatchAction::Created { supplier_id } => Some(supplier_id),
                    MatchAction::SuggestionsAvailable => None,
                },
                Err(e) => {
                    warn!(merchant_id = %merchant_id, error = %e, "supplier resolution failed, saving unlinked");
                    None
                }
            }
        };

        let outcome = ctx
            .po_writer
            .persist(PersistRequest {
                merchant_id,
                upload_id: Some(upload_id),
                existing_po_id: workflow.purchase_order_id,
                document,
                confidence,
                supplier_id,
            })
            .await?;

        ctx.db
            .update_po_status(
                outcome.purchase_order_id,
                PoStatus::ReviewNeeded,
                Some(self.stage().queue_name()),
            )
            .await
            .map_err(StockflowError::Internal)?;

        Ok(StageOutcome {
            next: Some(StagePayload::DataNormalization {
                merchant_id,
                purchase_order_id: outcome.purchase_order_id,
                line_item_ids: outcome.line_item_ids,
            }),
            purchase_order_id: Some(outcome.purchase_order_id),
            merchant_id,
            message: format!("purchase order {} saved", outcome.number),
        })
    }
}
