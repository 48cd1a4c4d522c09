// Commerce platform client
//
// Product upsert keyed by the draft's external id: a draft that already
// synced gets a PUT to the same product, a fresh one gets a POST. That is
// what makes stage 9 safe to re-run under at-least-once delivery.

use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use stockflow_core::{Result, StockflowConfig, StockflowError};
use stockflow_storage::{ProductDraftRow, ProductImageRow};

const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ProductResponse {
    product: Product,
}

#[derive(Debug, Deserialize)]
struct Product {
    id: i64,
    #[serde(default)]
    variants: Vec<Variant>,
}

#[derive(Debug, Deserialize)]
struct Variant {
    id: i64,
}

pub struct ShopifyClient {
    http: reqwest::Client,
    base_url: String,
}

impl ShopifyClient {
    pub fn new(config: &StockflowConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.shopify_api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Push one draft; returns (external_product_id, external_variant_id)
    pub async fn upsert_product(
        &self,
        draft: &ProductDraftRow,
        images: &[ProductImageRow],
    ) -> Result<(String, Option<String>)> {
        let title = draft
            .refined_title
            .clone()
            .unwrap_or_else(|| draft.original_title.clone());
        let body_html = draft
            .refined_description
            .clone()
            .or_else(|| draft.original_description.clone())
            .unwrap_or_default();
        let price = draft.price_refined.unwrap_or(draft.original_price);
        let tags: Vec<String> = serde_json::from_value(draft.tags.clone()).unwrap_or_default();

        let payload = serde_json::json!({
            "product": {
                "title": title,
                "body_html": body_html,
                "status": "draft",
                "tags": tags.join(", "),
                "variants": [{ "price": format!("{price:.2}"), "sku": draft.line_item_id }],
                "images": images.iter().map(|i| serde_json::json!({"src": i.url})).collect::<Vec<_>>(),
            }
        });

        let request = match &draft.external_product_id {
            Some(external_id) => self
                .http
                .put(format!("{}/products/{external_id}.json", self.base_url)),
            None => self.http.post(format!("{}/products.json", self.base_url)),
        };

        let response = request
            .timeout(SYNC_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| StockflowError::transient(format!("platform sync: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(StockflowError::transient(format!(
                "platform returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(StockflowError::business(format!(
                "platform rejected draft {}: {status}",
                draft.id
            )));
        }

        let parsed: ProductResponse = response
            .json()
            .await
            .map_err(|e| StockflowError::validation(format!("malformed platform response: {e}")))?;

        info!(
            draft_id = %draft.id,
            external_product_id = parsed.product.id,
            "draft synced to platform"
        );
        Ok((
            parsed.product.id.to_string(),
            parsed.product.variants.first().map(|v| v.id.to_string()),
        ))
    }
}
