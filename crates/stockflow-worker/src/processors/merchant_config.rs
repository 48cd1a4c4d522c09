// Stage 4: tenant-specific tagging and categorization

use async_trait::async_trait;

use stockflow_core::{ItemSeed, Result, Stage, StageOutcome, StagePayload, StockflowError};
use stockflow_storage::WorkflowExecutionRow;

use crate::context::WorkerContext;
use crate::processors::{payload_mismatch, StageProcessor};

const DEFAULT_TAGS: &[&str] = &["po-import"];

/// Keyword buckets for default categorization; merchants override via the
/// `categories` settings map
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("Tools & Hardware", &["drill", "bolt", "screw", "wrench", "tool", "fastener"]),
    ("Electronics", &["battery", "cable", "charger", "led", "adapter", "sensor"]),
    ("Office Supplies", &["paper", "pen", "folder", "stapler", "envelope", "label"]),
    ("Cleaning & Janitorial", &["cleaner", "towel", "soap", "glove", "wipe", "detergent"]),
    ("Packaging", &["box", "tape", "bubble", "mailer", "pallet", "wrap"]),
];

/// Default category from title keywords; None when nothing matches
pub fn categorize(title: &str) -> Option<String> {
    let lower = title.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| category.to_string())
}

fn apply_rules(
    mut item: ItemSeed,
    merchant_tags: &[String],
    supplier_name: Option<&str>,
) -> ItemSeed {
    let mut tags: Vec<String> = DEFAULT_TAGS.iter().map(|t| t.to_string()).collect();
    tags.extend(merchant_tags.iter().cloned());
    if let Some(name) = supplier_name {
        tags.push(format!("supplier:{name}"));
    }
    tags.dedup();
    item.tags = tags;
    if item.category.is_none() {
        item.category = categorize(&item.title);
    }
    item
}

pub struct MerchantConfigProcessor;

#[async_trait]
impl StageProcessor for MerchantConfigProcessor {
    fn stage(&self) -> Stage {
        Stage::MerchantConfig
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        _workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome> {
        let StagePayload::MerchantConfig {
            merchant_id,
            purchase_order_id,
            items,
        } = input
        else {
            return Err(payload_mismatch(self.stage(), &input));
        };

        let merchant_tags: Vec<String> = ctx
            .db
            .get_merchant(merchant_id)
            .await
            .map_err(StockflowError::Internal)?
            .and_then(|m| {
                m.settings
                    .get("tagging")
                    .and_then(|t| t.get("defaultTags"))
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
            })
            .unwrap_or_default();

        let supplier_name = match ctx
            .db
            .get_purchase_order(purchase_order_id)
            .await
            .map_err(StockflowError::Internal)?
            .and_then(|po| po.supplier_id)
        {
            Some(supplier_id) => ctx
                .db
                .get_supplier(supplier_id)
                .await
                .map_err(StockflowError::Internal)?
                .map(|s| s.name),
            None => None,
        };

        let items: Vec<ItemSeed> = items
            .into_iter()
            .map(|item| apply_rules(item, &merchant_tags, supplier_name.as_deref()))
            .collect();

        Ok(StageOutcome {
            next: Some(StagePayload::AiEnrichment {
                merchant_id,
                purchase_order_id,
                items,
            }),
            purchase_order_id: Some(purchase_order_id),
            merchant_id,
            message: "merchant rules applied".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn seed(title: &str) -> ItemSeed {
        ItemSeed {
            line_item_id: Uuid::now_v7(),
            sku: None,
            title: title.to_string(),
            description: None,
            quantity: 1,
            unit_cost: 1.0,
            total_cost: 1.0,
            tags: Vec::new(),
            category: None,
            refined_title: None,
            refined_description: None,
            price_refined: None,
        }
    }

    #[test]
    fn categorization_matches_keywords() {
        assert_eq!(categorize("Cordless Drill 18V").as_deref(), Some("Tools & Hardware"));
        assert_eq!(categorize("AA Battery 24 ct").as_deref(), Some("Electronics"));
        assert_eq!(categorize("Mystery Item"), None);
    }

    #[test]
    fn rules_stack_default_merchant_and_supplier_tags() {
        let item = apply_rules(
            seed("Packing Tape"),
            &["wholesale".to_string()],
            Some("Acme Industrial Supply"),
        );
        assert_eq!(
            item.tags,
            vec!["po-import", "wholesale", "supplier:Acme Industrial Supply"]
        );
        assert_eq!(item.category.as_deref(), Some("Packaging"));
    }
}
