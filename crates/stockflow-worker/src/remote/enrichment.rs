// Secondary enrichment RPC
//
// Optional polish of titles and descriptions. Any failure here passes the
// items through untouched; enrichment never blocks the pipeline.

use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use stockflow_core::extraction::strip_code_fences;
use stockflow_core::{ItemSeed, StockflowConfig};

const ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrichmentResponse {
    #[serde(default)]
    items: Vec<EnrichedItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrichedItem {
    line_item_id: uuid::Uuid,
    #[serde(default)]
    refined_title: Option<String>,
    #[serde(default)]
    refined_description: Option<String>,
    #[serde(default)]
    refined_price: Option<f64>,
}

pub struct EnrichmentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl EnrichmentClient {
    pub fn new(config: &StockflowConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/enrich", config.extraction_api_url.trim_end_matches('/')),
            api_key: config.extraction_api_key.clone(),
        }
    }

    /// Enrich item titles/descriptions; the input comes back unchanged on
    /// any error
    pub async fn enrich(&self, mut items: Vec<ItemSeed>) -> Vec<ItemSeed> {
        let prompt_items: Vec<serde_json::Value> = items
            .iter()
            .map(|i| {
                serde_json::json!({
                    "lineItemId": i.line_item_id,
                    "title": i.title,
                    "description": i.description,
                    "category": i.category,
                })
            })
            .collect();

        let mut request = self
            .http
            .post(&self.base_url)
            .timeout(ENRICHMENT_TIMEOUT)
            .json(&serde_json::json!({
                "items": prompt_items,
                "prompt": "Refine each product title and description for an online storefront. Respond with raw JSON {items:[{lineItemId, refinedTitle, refinedDescription, refinedPrice}]}.",
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let text = match request.send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "enrichment body unreadable, passing items through");
                    return items;
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "enrichment rejected, passing items through");
                return items;
            }
            Err(e) => {
                warn!(error = %e, "enrichment rpc failed, passing items through");
                return items;
            }
        };

        let parsed: EnrichmentResponse = match serde_json::from_str(strip_code_fences(&text)) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "malformed enrichment response, passing items through");
                return items;
            }
        };

        for enriched in parsed.items {
            if let Some(item) = items
                .iter_mut()
                .find(|i| i.line_item_id == enriched.line_item_id)
            {
                if enriched.refined_title.is_some() {
                    item.refined_title = enriched.refined_title;
                }
                if enriched.refined_description.is_some() {
                    item.refined_description = enriched.refined_description;
                }
                if enriched.refined_price.is_some() {
                    item.price_refined = enriched.refined_price;
                }
            }
        }
        items
    }
}
