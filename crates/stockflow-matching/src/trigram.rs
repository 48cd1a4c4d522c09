// Trigram matching engine
//
// One indexed similarity() query against the GIN index on
// suppliers.name_normalized. Requires the pg_trgm extension; when that is
// missing or the query errors, the router falls back to the in-process
// engine.

use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

use stockflow_core::{Result, StockflowError, SupplierStub};
use stockflow_storage::{Database, SupplierRow};

use crate::normalize::normalize_supplier_name;
use crate::score::{combine, secondary_scores, SupplierCandidate};

const SIMILARITY_THRESHOLD: f64 = 0.30;

#[derive(Debug, FromRow)]
struct TrigramHit {
    id: Uuid,
    merchant_id: Uuid,
    name: String,
    name_normalized: String,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    website: Option<String>,
    address: Option<String>,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    sim: f64,
}

pub struct TrigramEngine {
    db: Database,
}

impl TrigramEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn find_matches(
        &self,
        merchant_id: Uuid,
        stub: &SupplierStub,
        limit: usize,
    ) -> Result<Vec<SupplierCandidate>> {
        let Some(name) = stub.name.as_deref() else {
            return Ok(Vec::new());
        };
        let query_name = normalize_supplier_name(name);
        if query_name.is_empty() {
            return Ok(Vec::new());
        }

        let hits = sqlx::query_as::<_, TrigramHit>(
            r#"
            SELECT id, merchant_id, name, name_normalized, contact_email, contact_phone,
                   website, address, status, created_at, updated_at,
                   similarity(name_normalized, $2)::float8 AS sim
            FROM suppliers
            WHERE merchant_id = $1
              AND status = 'active'
              AND similarity(name_normalized, $2) >= $3
            ORDER BY sim DESC
            LIMIT $4
            "#,
        )
        .bind(merchant_id)
        .bind(&query_name)
        .bind(SIMILARITY_THRESHOLD)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| StockflowError::transient(format!("trigram query failed: {e}")))?;

        let mut candidates: Vec<SupplierCandidate> = hits
            .into_iter()
            .map(|hit| {
                let supplier = SupplierRow {
                    id: hit.id,
                    merchant_id: hit.merchant_id,
                    name: hit.name,
                    name_normalized: hit.name_normalized,
                    contact_email: hit.contact_email,
                    contact_phone: hit.contact_phone,
                    website: hit.website,
                    address: hit.address,
                    status: hit.status,
                    created_at: hit.created_at,
                    updated_at: hit.updated_at,
                };
                let (email, website, phone, address) = secondary_scores(stub, &supplier);
                let score = combine(Some(hit.sim), email, website, phone, address);
                SupplierCandidate { supplier, score }
            })
            .filter(|c| c.score >= 0.50)
            .collect();

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        debug!(
            merchant_id = %merchant_id,
            candidates = candidates.len(),
            "trigram engine ranked suppliers"
        );
        Ok(candidates)
    }
}
