// Stage-to-stage payload blobs
//
// Each stage consumes the previous stage's output from the stage store and
// produces the next variant. The enum is serde-tagged so a blob read back
// from storage always deserializes into exactly one boundary shape; there is
// no free-form map handoff between stages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extraction::ExtractedDocument;
use crate::stage::Stage;

/// A line item as it accumulates refinements across stages 3-6
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemSeed {
    pub line_item_id: Uuid,
    pub sku: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit_cost: f64,
    pub total_cost: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub refined_title: Option<String>,
    #[serde(default)]
    pub refined_description: Option<String>,
    #[serde(default)]
    pub price_refined: Option<f64>,
}

/// Commerce-platform-ready product shape built by stage 6
///
/// Originals and refinements stay separate all the way into the draft row;
/// the platform client picks the refined value at sync time when one exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductPayload {
    pub line_item_id: Uuid,
    pub original_title: String,
    pub refined_title: Option<String>,
    pub original_description: Option<String>,
    pub refined_description: Option<String>,
    pub original_price: f64,
    pub price_refined: Option<f64>,
    pub sku: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
}

/// Input blob for one stage, written by the stage before it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StagePayload {
    AiParsing {
        upload_id: Uuid,
        merchant_id: Uuid,
    },
    DatabaseSave {
        upload_id: Uuid,
        merchant_id: Uuid,
        document: ExtractedDocument,
        confidence: f64,
    },
    DataNormalization {
        merchant_id: Uuid,
        purchase_order_id: Uuid,
        line_item_ids: Vec<Uuid>,
    },
    MerchantConfig {
        merchant_id: Uuid,
        purchase_order_id: Uuid,
        items: Vec<ItemSeed>,
    },
    AiEnrichment {
        merchant_id: Uuid,
        purchase_order_id: Uuid,
        items: Vec<ItemSeed>,
    },
    ShopifyPayload {
        merchant_id: Uuid,
        purchase_order_id: Uuid,
        items: Vec<ItemSeed>,
    },
    ProductDraftCreation {
        merchant_id: Uuid,
        purchase_order_id: Uuid,
        payloads: Vec<ProductPayload>,
    },
    ImageAttachment {
        merchant_id: Uuid,
        purchase_order_id: Uuid,
        draft_ids: Vec<Uuid>,
    },
    ShopifySync {
        merchant_id: Uuid,
        purchase_order_id: Uuid,
        draft_ids: Vec<Uuid>,
    },
    StatusUpdate {
        merchant_id: Uuid,
        purchase_order_id: Uuid,
        #[serde(default)]
        synced_product_ids: Vec<String>,
    },
}

impl StagePayload {
    /// The stage this blob is input for
    pub fn stage(&self) -> Stage {
        match self {
            StagePayload::AiParsing { .. } => Stage::AiParsing,
            StagePayload::DatabaseSave { .. } => Stage::DatabaseSave,
            StagePayload::DataNormalization { .. } => Stage::DataNormalization,
            StagePayload::MerchantConfig { .. } => Stage::MerchantConfig,
            StagePayload::AiEnrichment { .. } => Stage::AiEnrichment,
            StagePayload::ShopifyPayload { .. } => Stage::ShopifyPayload,
            StagePayload::ProductDraftCreation { .. } => Stage::ProductDraftCreation,
            StagePayload::ImageAttachment { .. } => Stage::ImageAttachment,
            StagePayload::ShopifySync { .. } => Stage::ShopifySync,
            StagePayload::StatusUpdate { .. } => Stage::StatusUpdate,
        }
    }

    pub fn merchant_id(&self) -> Uuid {
        match self {
            StagePayload::AiParsing { merchant_id, .. }
            | StagePayload::DatabaseSave { merchant_id, .. }
            | StagePayload::DataNormalization { merchant_id, .. }
            | StagePayload::MerchantConfig { merchant_id, .. }
            | StagePayload::AiEnrichment { merchant_id, .. }
            | StagePayload::ShopifyPayload { merchant_id, .. }
            | StagePayload::ProductDraftCreation { merchant_id, .. }
            | StagePayload::ImageAttachment { merchant_id, .. }
            | StagePayload::ShopifySync { merchant_id, .. }
            | StagePayload::StatusUpdate { merchant_id, .. } => *merchant_id,
        }
    }

    pub fn purchase_order_id(&self) -> Option<Uuid> {
        match self {
            StagePayload::AiParsing { .. } | StagePayload::DatabaseSave { .. } => None,
            StagePayload::DataNormalization {
                purchase_order_id, ..
            }
            | StagePayload::MerchantConfig {
                purchase_order_id, ..
            }
            | StagePayload::AiEnrichment {
                purchase_order_id, ..
            }
            | StagePayload::ShopifyPayload {
                purchase_order_id, ..
            }
            | StagePayload::ProductDraftCreation {
                purchase_order_id, ..
            }
            | StagePayload::ImageAttachment {
                purchase_order_id, ..
            }
            | StagePayload::ShopifySync {
                purchase_order_id, ..
            }
            | StagePayload::StatusUpdate {
                purchase_order_id, ..
            } => Some(*purchase_order_id),
        }
    }
}

/// What a processor hands back to the orchestrator
///
/// `next` is the blob for the following stage (None after the terminal
/// stage). Identifiers are returned in both execution modes so sequential
/// mode can thread state without re-reading the stage store.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub next: Option<StagePayload>,
    pub purchase_order_id: Option<Uuid>,
    pub merchant_id: Uuid,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractedLineItem, SupplierStub};

    #[test]
    fn blob_round_trips_through_json() {
        let payload = StagePayload::DatabaseSave {
            upload_id: Uuid::now_v7(),
            merchant_id: Uuid::now_v7(),
            document: ExtractedDocument {
                number: Some("1142384989090".into()),
                supplier: SupplierStub {
                    name: Some("Acme Industrial Supply".into()),
                    email: Some("sales@acmeindustrial.com".into()),
                    ..Default::default()
                },
                line_items: vec![ExtractedLineItem {
                    sku: Some("W-A".into()),
                    product_name: "Widget A - Case of 12".into(),
                    description: None,
                    quantity: 12,
                    unit_cost: Some(3.25),
                    total_cost: Some(39.0),
                }],
                totals: None,
                currency: Some("USD".into()),
            },
            confidence: 0.92,
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: StagePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.stage(), Stage::DatabaseSave);
    }

    #[test]
    fn tagged_representation_names_the_stage() {
        let payload = StagePayload::ImageAttachment {
            merchant_id: Uuid::now_v7(),
            purchase_order_id: Uuid::now_v7(),
            draft_ids: vec![],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["stage"], "image_attachment");
    }

    #[test]
    fn purchase_order_id_absent_before_persistence() {
        let payload = StagePayload::AiParsing {
            upload_id: Uuid::now_v7(),
            merchant_id: Uuid::now_v7(),
        };
        assert_eq!(payload.purchase_order_id(), None);
    }
}
