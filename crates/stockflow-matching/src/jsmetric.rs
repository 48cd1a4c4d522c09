// In-process matching engine
//
// Fetches the merchant's active suppliers and scores them with an edit
// distance metric. O(n·m²) in directory size and name length: fine for a
// few hundred suppliers, unacceptable beyond ~500 — that is what the
// trigram engine is for.

use tracing::debug;
use uuid::Uuid;

use stockflow_core::{Result, StockflowError, SupplierStub};
use stockflow_storage::Database;

use crate::normalize::normalize_supplier_name;
use crate::score::{combine, secondary_scores, SupplierCandidate};

pub struct JsMetricEngine {
    db: Database,
}

impl JsMetricEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Rank the merchant's suppliers against the stub; an empty directory
    /// returns an empty list, never an error
    pub async fn find_matches(
        &self,
        merchant_id: Uuid,
        stub: &SupplierStub,
        limit: usize,
    ) -> Result<Vec<SupplierCandidate>> {
        let suppliers = self
            .db
            .list_active_suppliers(merchant_id)
            .await
            .map_err(StockflowError::Internal)?;
        if suppliers.is_empty() {
            return Ok(Vec::new());
        }

        let query_name = stub.name.as_deref().map(normalize_supplier_name);

        let mut candidates: Vec<SupplierCandidate> = suppliers
            .into_iter()
            .map(|supplier| {
                let name_score = query_name
                    .as_deref()
                    .filter(|q| !q.is_empty())
                    .map(|q| strsim::normalized_levenshtein(q, &supplier.name_normalized));
                let (email, website, phone, address) = secondary_scores(stub, &supplier);
                let score = combine(name_score, email, website, phone, address);
                SupplierCandidate { supplier, score }
            })
            .filter(|c| c.score >= 0.50)
            .collect();

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(limit);

        debug!(
            merchant_id = %merchant_id,
            candidates = candidates.len(),
            "jsmetric engine ranked suppliers"
        );
        Ok(candidates)
    }
}
