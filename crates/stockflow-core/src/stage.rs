// The ten pipeline stages, in execution order

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A single step of the ten-step pipeline
///
/// Order matters: `next()` walks the fixed linear sequence and the queue
/// substrate keeps one named queue per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AiParsing,
    DatabaseSave,
    DataNormalization,
    MerchantConfig,
    AiEnrichment,
    ShopifyPayload,
    ProductDraftCreation,
    ImageAttachment,
    ShopifySync,
    StatusUpdate,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::AiParsing,
        Stage::DatabaseSave,
        Stage::DataNormalization,
        Stage::MerchantConfig,
        Stage::AiEnrichment,
        Stage::ShopifyPayload,
        Stage::ProductDraftCreation,
        Stage::ImageAttachment,
        Stage::ShopifySync,
        Stage::StatusUpdate,
    ];

    /// Queue name for this stage (one FIFO queue per stage)
    pub fn queue_name(&self) -> &'static str {
        match self {
            Stage::AiParsing => "ai_parsing",
            Stage::DatabaseSave => "database_save",
            Stage::DataNormalization => "data_normalization",
            Stage::MerchantConfig => "merchant_config",
            Stage::AiEnrichment => "ai_enrichment",
            Stage::ShopifyPayload => "shopify_payload",
            Stage::ProductDraftCreation => "product_draft_creation",
            Stage::ImageAttachment => "image_attachment",
            Stage::ShopifySync => "shopify_sync",
            Stage::StatusUpdate => "status_update",
        }
    }

    pub fn from_queue_name(name: &str) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.queue_name() == name)
    }

    /// 1-based position in the pipeline
    pub fn index(&self) -> usize {
        Stage::ALL.iter().position(|s| s == self).unwrap() + 1
    }

    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.index()).copied()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::StatusUpdate)
    }

    /// Whether the stage mutates the purchase order and therefore needs the
    /// advisory lock before running
    pub fn mutates_purchase_order(&self) -> bool {
        !matches!(self, Stage::AiParsing | Stage::ImageAttachment)
    }

    /// Progress shown to clients when the stage begins
    pub fn entry_progress(&self) -> u8 {
        match self {
            Stage::AiParsing => 5,
            Stage::DatabaseSave => 20,
            Stage::DataNormalization => 35,
            Stage::MerchantConfig => 45,
            Stage::AiEnrichment => 55,
            Stage::ShopifyPayload => 65,
            Stage::ProductDraftCreation => 75,
            Stage::ImageAttachment => 85,
            Stage::ShopifySync => 92,
            Stage::StatusUpdate => 98,
        }
    }

    /// Worst-case cost estimate used by the sequential-mode budget planner
    ///
    /// Deliberately pessimistic: extraction and enrichment dominate because
    /// they call remote models with adaptive timeouts.
    pub fn estimated_cost(&self) -> Duration {
        let secs = match self {
            Stage::AiParsing => 120,
            Stage::DatabaseSave => 20,
            Stage::DataNormalization => 5,
            Stage::MerchantConfig => 5,
            Stage::AiEnrichment => 60,
            Stage::ShopifyPayload => 5,
            Stage::ProductDraftCreation => 15,
            Stage::ImageAttachment => 30,
            Stage::ShopifySync => 45,
            Stage::StatusUpdate => 5,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.queue_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_walk_in_order() {
        let mut stage = Stage::AiParsing;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen, Stage::ALL.to_vec());
        assert!(stage.is_terminal());
    }

    #[test]
    fn queue_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_queue_name(stage.queue_name()), Some(stage));
        }
        assert_eq!(Stage::from_queue_name("nope"), None);
    }

    #[test]
    fn progress_is_monotonic() {
        let progress: Vec<u8> = Stage::ALL.iter().map(|s| s.entry_progress()).collect();
        let mut sorted = progress.clone();
        sorted.sort_unstable();
        assert_eq!(progress, sorted);
    }
}
