// Stage 6: shape commerce-platform-ready product payloads

use async_trait::async_trait;

use stockflow_core::{ItemSeed, ProductPayload, Result, Stage, StageOutcome, StagePayload};
use stockflow_storage::WorkflowExecutionRow;

use crate::context::WorkerContext;
use crate::processors::{payload_mismatch, StageProcessor};

fn to_body_html(text: &str) -> String {
    format!("<p>{text}</p>")
}

/// Build the platform payload for one item
///
/// Originals and refinements travel side by side: the draft row keeps both
/// and the sync client decides which to send.
pub fn build_payload(item: &ItemSeed) -> ProductPayload {
    let original_description = item
        .description
        .as_deref()
        .or(Some(item.title.as_str()))
        .map(to_body_html);

    ProductPayload {
        line_item_id: item.line_item_id,
        original_title: item.title.clone(),
        refined_title: item.refined_title.clone(),
        original_description,
        refined_description: item.refined_description.as_deref().map(to_body_html),
        original_price: item.unit_cost,
        price_refined: item.price_refined,
        sku: item.sku.clone(),
        tags: item.tags.clone(),
        category: item.category.clone(),
    }
}

pub struct ShopifyPayloadProcessor;

#[async_trait]
impl StageProcessor for ShopifyPayloadProcessor {
    fn stage(&self) -> Stage {
        Stage::ShopifyPayload
    }

    async fn run(
        &self,
        _ctx: &WorkerContext,
        _workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome> {
        let StagePayload::ShopifyPayload {
            merchant_id,
            purchase_order_id,
            items,
        } = input
        else {
            return Err(payload_mismatch(self.stage(), &input));
        };

        let payloads: Vec<ProductPayload> = items.iter().map(build_payload).collect();

        Ok(StageOutcome {
            next: Some(StagePayload::ProductDraftCreation {
                merchant_id,
                purchase_order_id,
                payloads,
            }),
            purchase_order_id: Some(purchase_order_id),
            merchant_id,
            message: "platform payloads built".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn seed() -> ItemSeed {
        ItemSeed {
            line_item_id: Uuid::now_v7(),
            sku: Some("WA-12".into()),
            title: "Widget A - Case of 12".into(),
            description: Some("raw".into()),
            quantity: 12,
            unit_cost: 3.25,
            total_cost: 39.0,
            tags: vec!["po-import".into()],
            category: Some("Tools & Hardware".into()),
            refined_title: Some("Widget A (12-Pack)".into()),
            refined_description: Some("A dozen widgets.".into()),
            price_refined: Some(3.49),
        }
    }

    #[test]
    fn refinements_travel_alongside_originals() {
        let payload = build_payload(&seed());
        assert_eq!(payload.original_title, "Widget A - Case of 12");
        assert_eq!(payload.refined_title.as_deref(), Some("Widget A (12-Pack)"));
        assert_eq!(payload.original_description.as_deref(), Some("<p>raw</p>"));
        assert_eq!(
            payload.refined_description.as_deref(),
            Some("<p>A dozen widgets.</p>")
        );
        assert_eq!(payload.original_price, 3.25);
        assert_eq!(payload.price_refined, Some(3.49));
    }

    #[test]
    fn unrefined_items_carry_no_refinements() {
        let mut item = seed();
        item.refined_title = None;
        item.refined_description = None;
        item.price_refined = None;
        item.description = None;

        let payload = build_payload(&item);
        assert!(payload.refined_title.is_none());
        assert!(payload.refined_description.is_none());
        assert!(payload.price_refined.is_none());
        // The title stands in for a missing description
        assert_eq!(
            payload.original_description.as_deref(),
            Some("<p>Widget A - Case of 12</p>")
        );
    }
}
