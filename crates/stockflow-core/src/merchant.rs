// Per-merchant settings stored in the merchants.settings JSONB map

use serde::{Deserialize, Serialize};

/// Which fuzzy-matching engine a merchant is pinned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuzzyEngineChoice {
    /// Follow the rollout / global flag routing
    Auto,
    Trigram,
    Jsmetric,
}

/// Recognized keys of the merchant settings map; unknown keys are ignored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantSettings {
    #[serde(default)]
    pub fuzzy_matching_engine: Option<FuzzyEngineChoice>,
    #[serde(default)]
    pub enable_sequential_workflow: Option<bool>,
    #[serde(default)]
    pub rollout_group_seed: Option<String>,
}

impl MerchantSettings {
    /// Parse from the raw settings blob, tolerating unknown or missing keys
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_recognized_keys_and_ignores_the_rest() {
        let settings = MerchantSettings::from_value(&json!({
            "fuzzyMatchingEngine": "trigram",
            "enableSequentialWorkflow": true,
            "someFutureKey": {"nested": 1},
        }));
        assert_eq!(
            settings.fuzzy_matching_engine,
            Some(FuzzyEngineChoice::Trigram)
        );
        assert_eq!(settings.enable_sequential_workflow, Some(true));
        assert!(settings.rollout_group_seed.is_none());
    }

    #[test]
    fn malformed_settings_fall_back_to_defaults() {
        let settings = MerchantSettings::from_value(&json!("not a map"));
        assert!(settings.fuzzy_matching_engine.is_none());
    }
}
