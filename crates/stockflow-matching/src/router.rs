// Engine routing, fallback, auto-matching and metric emission
//
// Routing priority: explicit override, per-merchant setting, rollout
// percentage, global flag, default jsmetric. The rollout check runs BEFORE
// the global flag on purpose — a globally-off flag would otherwise force
// 100% jsmetric and make canary rollouts impossible.

use sha2::{Digest, Sha256};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use stockflow_core::{FuzzyEngineChoice, MerchantSettings, Result, SupplierStub};
use stockflow_storage::{CreatePerformanceMetric, CreateSupplier, Database};

use crate::jsmetric::JsMetricEngine;
use crate::normalize::normalize_supplier_name;
use crate::score::SupplierCandidate;
use crate::trigram::TrigramEngine;

const DEFAULT_LIMIT: usize = 10;
const AUTO_LINK_THRESHOLD: f64 = 0.85;
const CREATE_THRESHOLD: f64 = 0.50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Trigram,
    Jsmetric,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Trigram => "trigram",
            Engine::Jsmetric => "jsmetric",
        }
    }
}

/// Resolver-relevant slice of the process configuration
#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    pub use_pg_trgm: bool,
    pub rollout_percentage: u8,
    pub performance_monitoring: bool,
}

#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub merchant_id: Uuid,
    pub stub: SupplierStub,
    pub engine_override: Option<Engine>,
    pub create_if_no_match: bool,
    /// When set and the top candidate clears the auto-link bar, the
    /// purchase order is linked as a side effect
    pub purchase_order_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchAction {
    AutoLinked { supplier_id: Uuid },
    Created { supplier_id: Uuid },
    SuggestionsAvailable,
}

#[derive(Debug)]
pub struct MatchOutcome {
    pub action: MatchAction,
    pub candidates: Vec<SupplierCandidate>,
    pub engine: Engine,
    pub was_fallback: bool,
}

/// Deterministic rollout bucket in 0..100 for a merchant
pub fn rollout_bucket(merchant_id: Uuid, seed: Option<&str>) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(merchant_id.as_bytes());
    if let Some(seed) = seed {
        hasher.update(seed.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % 100) as u8
}

/// Pick the engine for one request; pure so the priority chain is testable
pub fn select_engine(
    config: &ResolverConfig,
    settings: &MerchantSettings,
    merchant_id: Uuid,
    engine_override: Option<Engine>,
) -> Engine {
    if let Some(engine) = engine_override {
        return engine;
    }
    match settings.fuzzy_matching_engine {
        Some(FuzzyEngineChoice::Trigram) => return Engine::Trigram,
        Some(FuzzyEngineChoice::Jsmetric) => return Engine::Jsmetric,
        Some(FuzzyEngineChoice::Auto) | None => {}
    }
    if config.rollout_percentage > 0 {
        let bucket = rollout_bucket(merchant_id, settings.rollout_group_seed.as_deref());
        if bucket < config.rollout_percentage {
            return Engine::Trigram;
        }
    }
    if config.use_pg_trgm {
        return Engine::Trigram;
    }
    Engine::Jsmetric
}

pub struct SupplierResolver {
    db: Database,
    trigram: TrigramEngine,
    jsmetric: JsMetricEngine,
    config: ResolverConfig,
}

impl SupplierResolver {
    pub fn new(db: Database, config: ResolverConfig) -> Self {
        Self {
            trigram: TrigramEngine::new(db.clone()),
            jsmetric: JsMetricEngine::new(db.clone()),
            db,
            config,
        }
    }

    /// Rank candidate suppliers and apply the auto-match policy
    pub async fn find_matching_suppliers(&self, request: MatchRequest) -> Result<MatchOutcome> {
        let settings = self
            .db
            .merchant_settings(request.merchant_id)
            .await
            .unwrap_or_default();
        let selected = select_engine(
            &self.config,
            &settings,
            request.merchant_id,
            request.engine_override,
        );

        let started = Instant::now();
        let mut engine = selected;
        let mut was_fallback = false;

        let candidates = match selected {
            Engine::Trigram => {
                match self
                    .trigram
                    .find_matches(request.merchant_id, &request.stub, DEFAULT_LIMIT)
                    .await
                {
                    Ok(candidates) => Ok(candidates),
                    Err(e) => {
                        // The only cross-engine retry: a broken trigram path
                        // must not take supplier matching down with it
                        warn!(
                            merchant_id = %request.merchant_id,
                            error = %e,
                            "trigram engine failed, falling back to jsmetric"
                        );
                        engine = Engine::Jsmetric;
                        was_fallback = true;
                        self.jsmetric
                            .find_matches(request.merchant_id, &request.stub, DEFAULT_LIMIT)
                            .await
                    }
                }
            }
            Engine::Jsmetric => {
                self.jsmetric
                    .find_matches(request.merchant_id, &request.stub, DEFAULT_LIMIT)
                    .await
            }
        };

        let duration_ms = started.elapsed().as_millis() as i64;
        match candidates {
            Ok(candidates) => {
                self.record_metric(&request, engine, was_fallback, duration_ms, candidates.len(), true)
                    .await;
                let action = self.apply_match_policy(&request, &candidates).await?;
                Ok(MatchOutcome {
                    action,
                    candidates,
                    engine,
                    was_fallback,
                })
            }
            Err(e) => {
                self.record_metric(&request, engine, was_fallback, duration_ms, 0, false)
                    .await;
                Err(e)
            }
        }
    }

    async fn apply_match_policy(
        &self,
        request: &MatchRequest,
        candidates: &[SupplierCandidate],
    ) -> Result<MatchAction> {
        let best = candidates.first();

        if let Some(top) = best.filter(|c| c.score >= AUTO_LINK_THRESHOLD) {
            if let Some(po_id) = request.purchase_order_id {
                self.db
                    .set_po_supplier(po_id, top.supplier.id)
                    .await
                    .map_err(stockflow_core::StockflowError::Internal)?;
            }
            return Ok(MatchAction::AutoLinked {
                supplier_id: top.supplier.id,
            });
        }

        let best_score = best.map(|c| c.score).unwrap_or(0.0);
        if request.create_if_no_match && best_score < CREATE_THRESHOLD {
            if let Some(name) = request.stub.name.clone().filter(|n| !n.trim().is_empty()) {
                let supplier = self
                    .db
                    .create_supplier(CreateSupplier {
                        merchant_id: request.merchant_id,
                        name_normalized: normalize_supplier_name(&name),
                        name,
                        contact_email: request.stub.email.clone(),
                        contact_phone: request.stub.phone.clone(),
                        website: request.stub.website.clone(),
                        address: request.stub.address.clone(),
                    })
                    .await
                    .map_err(stockflow_core::StockflowError::Internal)?;
                if let Some(po_id) = request.purchase_order_id {
                    self.db
                        .set_po_supplier(po_id, supplier.id)
                        .await
                        .map_err(stockflow_core::StockflowError::Internal)?;
                }
                return Ok(MatchAction::Created {
                    supplier_id: supplier.id,
                });
            }
        }

        Ok(MatchAction::SuggestionsAvailable)
    }

    /// Fire-and-forget: a metric insert failure never fails the match
    async fn record_metric(
        &self,
        request: &MatchRequest,
        engine: Engine,
        was_fallback: bool,
        duration_ms: i64,
        result_count: usize,
        success: bool,
    ) {
        if !self.config.performance_monitoring {
            return;
        }
        let metric = CreatePerformanceMetric {
            merchant_id: request.merchant_id,
            operation: "find_matching_suppliers".to_string(),
            engine: engine.as_str().to_string(),
            duration_ms,
            result_count: result_count as i32,
            success,
            metadata: serde_json::json!({ "wasFallback": was_fallback }),
        };
        if let Err(e) = self.db.insert_performance_metric(metric).await {
            debug!(error = %e, "performance metric insert failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(use_pg_trgm: bool, rollout: u8) -> ResolverConfig {
        ResolverConfig {
            use_pg_trgm,
            rollout_percentage: rollout,
            performance_monitoring: true,
        }
    }

    #[test]
    fn override_beats_everything() {
        let settings = MerchantSettings {
            fuzzy_matching_engine: Some(FuzzyEngineChoice::Jsmetric),
            ..Default::default()
        };
        let engine = select_engine(
            &config(true, 100),
            &settings,
            Uuid::now_v7(),
            Some(Engine::Trigram),
        );
        assert_eq!(engine, Engine::Trigram);
    }

    #[test]
    fn merchant_setting_beats_rollout_and_flag() {
        let settings = MerchantSettings {
            fuzzy_matching_engine: Some(FuzzyEngineChoice::Jsmetric),
            ..Default::default()
        };
        assert_eq!(
            select_engine(&config(true, 100), &settings, Uuid::now_v7(), None),
            Engine::Jsmetric
        );
    }

    #[test]
    fn rollout_runs_before_the_global_flag() {
        // Global flag off, rollout 100%: every merchant still lands on
        // trigram. Evaluating the flag first would forbid the canary.
        let settings = MerchantSettings::default();
        assert_eq!(
            select_engine(&config(false, 100), &settings, Uuid::now_v7(), None),
            Engine::Trigram
        );
    }

    #[test]
    fn default_is_jsmetric() {
        let settings = MerchantSettings::default();
        assert_eq!(
            select_engine(&config(false, 0), &settings, Uuid::now_v7(), None),
            Engine::Jsmetric
        );
    }

    #[test]
    fn rollout_buckets_are_deterministic() {
        let merchant = Uuid::now_v7();
        assert_eq!(rollout_bucket(merchant, None), rollout_bucket(merchant, None));
        // Seed shifts the bucket for (at least some) merchants
        let shifted = (0..100)
            .map(|_| Uuid::now_v7())
            .any(|id| rollout_bucket(id, None) != rollout_bucket(id, Some("group-b")));
        assert!(shifted);
    }

    #[test]
    fn five_percent_rollout_routes_three_to_eight_percent() {
        let settings = MerchantSettings::default();
        let cfg = config(false, 5);
        let total = 10_000;
        let trigram_count = (0..total)
            .filter(|_| {
                select_engine(&cfg, &settings, Uuid::now_v7(), None) == Engine::Trigram
            })
            .count();
        let share = trigram_count as f64 / total as f64;
        assert!(
            (0.03..=0.08).contains(&share),
            "trigram share {share} outside the binomial bound"
        );
    }
}
