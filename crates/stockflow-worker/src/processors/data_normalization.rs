// Stage 3: merchant-configured unit/sku/price normalization

use async_trait::async_trait;

use stockflow_core::{ItemSeed, Result, Stage, StageOutcome, StagePayload, StockflowError};
use stockflow_storage::{LineItemRow, WorkflowExecutionRow};

use crate::context::WorkerContext;
use crate::processors::{payload_mismatch, StageProcessor};

/// Normalization rules read from merchant settings; every field optional,
/// absent config falls through to defaults
#[derive(Debug, Clone)]
pub struct NormalizationRules {
    pub sku_prefix: Option<String>,
    pub uppercase_skus: bool,
    pub price_decimals: u32,
}

impl Default for NormalizationRules {
    fn default() -> Self {
        Self {
            sku_prefix: None,
            uppercase_skus: true,
            price_decimals: 2,
        }
    }
}

impl NormalizationRules {
    pub fn from_settings(settings: &serde_json::Value) -> Self {
        let section = settings.get("normalization");
        Self {
            sku_prefix: section
                .and_then(|s| s.get("skuPrefix"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            uppercase_skus: section
                .and_then(|s| s.get("uppercaseSkus"))
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            price_decimals: section
                .and_then(|s| s.get("priceDecimals"))
                .and_then(|v| v.as_u64())
                .unwrap_or(2) as u32,
        }
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Apply the rules to one stored line item
pub fn normalize_item(item: &LineItemRow, rules: &NormalizationRules) -> ItemSeed {
    let sku = item.sku.as_deref().map(|raw| {
        let mut sku = raw.trim().to_string();
        if rules.uppercase_skus {
            sku = sku.to_uppercase();
        }
        if let Some(prefix) = &rules.sku_prefix {
            if !sku.starts_with(prefix.as_str()) {
                sku = format!("{prefix}{sku}");
            }
        }
        sku
    });

    ItemSeed {
        line_item_id: item.id,
        sku,
        title: item.product_name.split_whitespace().collect::<Vec<_>>().join(" "),
        description: item
            .description
            .as_deref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        quantity: item.quantity.max(1),
        unit_cost: round_to(item.unit_cost, rules.price_decimals),
        total_cost: round_to(item.total_cost, rules.price_decimals),
        tags: Vec::new(),
        category: None,
        refined_title: None,
        refined_description: None,
        price_refined: None,
    }
}

pub struct DataNormalizationProcessor;

#[async_trait]
impl StageProcessor for DataNormalizationProcessor {
    fn stage(&self) -> Stage {
        Stage::DataNormalization
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        _workflow: &WorkflowExecutionRow,
        input: StagePayload,
    ) -> Result<StageOutcome> {
        let StagePayload::DataNormalization {
            merchant_id,
            purchase_order_id,
            line_item_ids,
        } = input
        else {
            return Err(payload_mismatch(self.stage(), &input));
        };

        let rules = ctx
            .db
            .get_merchant(merchant_id)
            .await
            .map_err(StockflowError::Internal)?
            .map(|m| NormalizationRules::from_settings(&m.settings))
            .unwrap_or_default();

        let line_items = ctx
            .db
            .list_line_items_by_ids(&line_item_ids)
            .await
            .map_err(StockflowError::Internal)?;
        let items: Vec<ItemSeed> = line_items
            .iter()
            .map(|li| normalize_item(li, &rules))
            .collect();

        Ok(StageOutcome {
            next: Some(StagePayload::MerchantConfig {
                merchant_id,
                purchase_order_id,
                items,
            }),
            purchase_order_id: Some(purchase_order_id),
            merchant_id,
            message: format!("{} line items normalized", line_item_ids.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn line_item(sku: Option<&str>, name: &str, unit: f64) -> LineItemRow {
        LineItemRow {
            id: Uuid::now_v7(),
            purchase_order_id: Uuid::now_v7(),
            sku: sku.map(str::to_string),
            product_name: name.to_string(),
            description: Some("  spec sheet attached  ".to_string()),
            quantity: 12,
            unit_cost: unit,
            total_cost: unit * 12.0,
            confidence: Some(0.9),
            raw_line: serde_json::json!({}),
        }
    }

    #[test]
    fn defaults_uppercase_and_round() {
        let item = line_item(Some(" wa-12 "), "Widget   A  - Case of 12", 3.2549);
        let seed = normalize_item(&item, &NormalizationRules::default());
        assert_eq!(seed.sku.as_deref(), Some("WA-12"));
        assert_eq!(seed.unit_cost, 3.25);
        assert_eq!(seed.title, "Widget A - Case of 12");
        assert_eq!(seed.description.as_deref(), Some("spec sheet attached"));
    }

    #[test]
    fn merchant_rules_apply_prefix_and_precision() {
        let rules = NormalizationRules::from_settings(&serde_json::json!({
            "normalization": {"skuPrefix": "ACME-", "uppercaseSkus": true, "priceDecimals": 2}
        }));
        let item = line_item(Some("wa-12"), "Widget A", 3.999);
        let seed = normalize_item(&item, &rules);
        assert_eq!(seed.sku.as_deref(), Some("ACME-WA-12"));
        assert_eq!(seed.unit_cost, 4.0);
    }

    #[test]
    fn missing_config_never_fails() {
        let rules = NormalizationRules::from_settings(&serde_json::json!("garbage"));
        let item = line_item(None, "Widget A", 1.0);
        let seed = normalize_item(&item, &rules);
        assert!(seed.sku.is_none());
        assert_eq!(seed.quantity, 12);
    }
}
