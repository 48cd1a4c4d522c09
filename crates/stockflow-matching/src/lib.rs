// Supplier resolver: dual-engine fuzzy matching behind a rollout-aware router

pub mod jsmetric;
pub mod normalize;
pub mod router;
pub mod score;
pub mod trigram;

pub use jsmetric::JsMetricEngine;
pub use normalize::normalize_supplier_name;
pub use router::{
    rollout_bucket, Engine, MatchAction, MatchOutcome, MatchRequest, ResolverConfig,
    SupplierResolver,
};
pub use score::{bucket, ConfidenceBucket, SupplierCandidate};
pub use trigram::TrigramEngine;
