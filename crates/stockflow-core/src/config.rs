// Process configuration read from the environment
//
// Binaries call `StockflowConfig::from_env()` once after dotenvy loads the
// .env file; everything downstream receives the parsed struct.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StockflowError};

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Settings handed to the external webhook module; parsed here so one place
/// owns the environment contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub rate_limit: u64,
    pub timeout_ms: u64,
    pub retry_attempts: u64,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StockflowConfig {
    /// Pooled database endpoint
    pub database_url: String,
    /// Direct endpoint for migrations; falls back to the pooled URL
    pub direct_url: String,
    /// Key/value broker endpoint
    pub broker_url: String,
    /// Global default for the trigram engine
    pub use_pg_trgm: bool,
    /// 0-100; evaluated BEFORE the global flag so canaries work while the
    /// default is still off
    pub rollout_percentage: u8,
    /// Run all stages in one invocation when set
    pub sequential_workflow: bool,
    pub performance_monitoring: bool,
    pub webhook: WebhookConfig,
    pub extraction_api_url: String,
    pub extraction_api_key: Option<String>,
    pub image_search_url: String,
    pub shopify_api_url: String,
}

impl StockflowConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| StockflowError::fatal("DATABASE_URL is not set"))?;
        let direct_url = std::env::var("DIRECT_URL").unwrap_or_else(|_| database_url.clone());
        let broker_url =
            std::env::var("BROKER_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let rollout_percentage = env_u64("PG_TRGM_ROLLOUT_PERCENTAGE", 0).min(100) as u8;

        Ok(Self {
            database_url,
            direct_url,
            broker_url,
            use_pg_trgm: env_bool("USE_PG_TRGM_FUZZY_MATCHING", false),
            rollout_percentage,
            sequential_workflow: env_bool("SEQUENTIAL_WORKFLOW", false),
            performance_monitoring: env_bool("ENABLE_PERFORMANCE_MONITORING", true),
            webhook: WebhookConfig {
                rate_limit: env_u64("WEBHOOK_RATE_LIMIT", 40),
                timeout_ms: env_u64("WEBHOOK_TIMEOUT", 30_000),
                retry_attempts: env_u64("WEBHOOK_RETRY_ATTEMPTS", 3),
                retry_delay_ms: env_u64("WEBHOOK_RETRY_DELAY", 1_000),
            },
            extraction_api_url: std::env::var("EXTRACTION_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8600/v1/extract".to_string()),
            extraction_api_key: std::env::var("EXTRACTION_API_KEY").ok(),
            image_search_url: std::env::var("IMAGE_SEARCH_URL")
                .unwrap_or_else(|_| "https://www.bing.com/images/search".to_string()),
            shopify_api_url: std::env::var("SHOPIFY_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8700/admin/api".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_accepts_one_and_true() {
        std::env::set_var("STOCKFLOW_TEST_FLAG", "1");
        assert!(env_bool("STOCKFLOW_TEST_FLAG", false));
        std::env::set_var("STOCKFLOW_TEST_FLAG", "false");
        assert!(!env_bool("STOCKFLOW_TEST_FLAG", true));
        std::env::remove_var("STOCKFLOW_TEST_FLAG");
        assert!(env_bool("STOCKFLOW_TEST_FLAG", true));
    }
}
