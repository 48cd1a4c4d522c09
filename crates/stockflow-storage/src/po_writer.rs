// Persistence service: the single bounded-time transaction of stage 2
//
// Supplier resolution and quantity normalization happen BEFORE this module
// is called; the transaction itself only upserts the header, bulk-inserts
// line items in one statement, and writes the audit row. Number conflicts
// are resolved OUTSIDE the aborted transaction and retried on a fresh one —
// a Postgres transaction in an aborted state rejects every further command
// until rollback.

use chrono::Utc;
use sqlx::Postgres;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use stockflow_core::{ExtractedDocument, Result, StockflowError};

use crate::models::PoStatus;
use crate::repositories::Database;

/// Transaction budget; a healthy commit stays well under 3 s
const TX_STATEMENT_TIMEOUT: &str = "SET LOCAL statement_timeout = '15s'";
const MAX_CONFLICT_RETRIES: u32 = 2;
const SUFFIX_PROBE_LIMIT: u32 = 10;

/// Per-line-item tolerance for the totals cross-check
const TOTALS_TOLERANCE_PER_ITEM: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct PersistRequest {
    pub merchant_id: Uuid,
    pub upload_id: Option<Uuid>,
    /// Set when re-parsing an already persisted purchase order
    pub existing_po_id: Option<Uuid>,
    pub document: ExtractedDocument,
    pub confidence: f64,
    pub supplier_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct PersistOutcome {
    pub purchase_order_id: Uuid,
    pub line_item_ids: Vec<Uuid>,
    /// The number that actually won, after any conflict resolution
    pub number: String,
}

pub struct PurchaseOrderWriter {
    db: Database,
}

impl PurchaseOrderWriter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist the extracted document, resolving `(merchant_id, number)`
    /// conflicts across fresh transactions
    pub async fn persist(&self, mut request: PersistRequest) -> Result<PersistOutcome> {
        check_totals(&request.document);

        if request.document.number.is_none() {
            // Keep the field populated: downstream retries key off its presence
            let placeholder = format!("TEMP-{}", &Uuid::now_v7().simple().to_string()[..8]);
            request.document.number = Some(placeholder);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_persist(&request).await {
                Ok(outcome) => return Ok(outcome),
                Err(StockflowError::Conflict { number, .. }) if attempt <= MAX_CONFLICT_RETRIES => {
                    let resolved = self.resolve_conflict(&request, &number).await?;
                    info!(
                        merchant_id = %request.merchant_id,
                        conflicting = %number,
                        resolved = %resolved,
                        "purchase order number conflict resolved, retrying in a fresh transaction"
                    );
                    // Write the winner back into the blob so the retry path
                    // still sees a number; deleting the field here would make
                    // the update clause skip it and corrupt the row
                    request.document.number = Some(resolved);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_persist(&self, request: &PersistRequest) -> Result<PersistOutcome> {
        let started = Instant::now();
        let number = request
            .document
            .number
            .clone()
            .expect("number populated before persist");

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StockflowError::transient(format!("begin transaction: {e}")))?;

        sqlx::query(TX_STATEMENT_TIMEOUT)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_tx_error(e, request, &number))?;

        let raw_data = serde_json::to_value(&request.document)
            .map_err(|e| StockflowError::validation(format!("document not serializable: {e}")))?;
        let total_amount = request.document.totals.as_ref().and_then(|t| t.total);

        let po_id = match request.existing_po_id {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE purchase_orders
                    SET number = $2,
                        supplier_id = COALESCE($3, supplier_id),
                        total_amount = COALESCE($4, total_amount),
                        currency = COALESCE($5, currency),
                        confidence = $6,
                        raw_data = $7,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(&number)
                .bind(request.supplier_id)
                .bind(total_amount)
                .bind(&request.document.currency)
                .bind(request.confidence)
                .bind(&raw_data)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_tx_error(e, request, &number))?;

                // Stage 2 owns the line items; a re-parse replaces them wholesale
                sqlx::query("DELETE FROM po_line_items WHERE purchase_order_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_tx_error(e, request, &number))?;

                id
            }
            None => {
                let (id,): (Uuid,) = sqlx::query_as(
                    r#"
                    INSERT INTO purchase_orders (id, merchant_id, number, supplier_id, status, total_amount, currency, confidence, raw_data)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    RETURNING id
                    "#,
                )
                .bind(Uuid::now_v7())
                .bind(request.merchant_id)
                .bind(&number)
                .bind(request.supplier_id)
                .bind(PoStatus::Processing.as_str())
                .bind(total_amount)
                .bind(&request.document.currency)
                .bind(request.confidence)
                .bind(&raw_data)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_tx_error(e, request, &number))?;
                id
            }
        };

        let line_item_ids = self
            .bulk_insert_line_items(&mut tx, po_id, request)
            .await
            .map_err(|e| map_tx_error(e, request, &number))?;

        sqlx::query(
            r#"
            INSERT INTO ai_processing_audits (id, merchant_id, purchase_order_id, upload_id, confidence, line_item_count, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(request.merchant_id)
        .bind(po_id)
        .bind(request.upload_id)
        .bind(request.confidence)
        .bind(line_item_ids.len() as i32)
        .bind(started.elapsed().as_millis() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_tx_error(e, request, &number))?;

        tx.commit()
            .await
            .map_err(|e| map_tx_error(e, request, &number))?;

        info!(
            purchase_order_id = %po_id,
            number = %number,
            line_items = line_item_ids.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "purchase order persisted"
        );

        Ok(PersistOutcome {
            purchase_order_id: po_id,
            line_item_ids,
            number,
        })
    }

    /// One multi-row INSERT for all line items. A per-item loop at
    /// serverless round-trip latency would dominate the transaction budget.
    async fn bulk_insert_line_items(
        &self,
        tx: &mut sqlx::Transaction<'_, Postgres>,
        po_id: Uuid,
        request: &PersistRequest,
    ) -> std::result::Result<Vec<Uuid>, sqlx::Error> {
        let items = &request.document.line_items;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = items.iter().map(|_| Uuid::now_v7()).collect();
        let skus: Vec<Option<String>> = items.iter().map(|i| i.sku.clone()).collect();
        let names: Vec<String> = items.iter().map(|i| i.product_name.clone()).collect();
        let descriptions: Vec<Option<String>> =
            items.iter().map(|i| i.description.clone()).collect();
        let quantities: Vec<i64> = items.iter().map(|i| i.quantity.max(1)).collect();
        let unit_costs: Vec<f64> = items
            .iter()
            .map(|i| {
                i.unit_cost
                    .or_else(|| i.total_cost.map(|t| t / i.quantity.max(1) as f64))
                    .unwrap_or(0.0)
            })
            .collect();
        let total_costs: Vec<f64> = items
            .iter()
            .map(|i| {
                i.total_cost
                    .or_else(|| i.unit_cost.map(|u| u * i.quantity.max(1) as f64))
                    .unwrap_or(0.0)
            })
            .collect();
        let raw_lines: Vec<serde_json::Value> = items
            .iter()
            .map(|i| serde_json::to_value(i).unwrap_or(serde_json::Value::Null))
            .collect();

        sqlx::query(
            r#"
            INSERT INTO po_line_items (id, purchase_order_id, sku, product_name, description, quantity, unit_cost, total_cost, confidence, raw_line)
            SELECT unnest($1::uuid[]), $2, unnest($3::text[]), unnest($4::text[]), unnest($5::text[]),
                   unnest($6::int8[]), unnest($7::float8[]), unnest($8::float8[]), $9, unnest($10::jsonb[])
            "#,
        )
        .bind(&ids)
        .bind(po_id)
        .bind(&skus)
        .bind(&names)
        .bind(&descriptions)
        .bind(&quantities)
        .bind(&unit_costs)
        .bind(&total_costs)
        .bind(request.confidence)
        .bind(&raw_lines)
        .execute(&mut **tx)
        .await?;

        Ok(ids)
    }

    /// Conflict resolution, always outside any transaction
    async fn resolve_conflict(
        &self,
        request: &PersistRequest,
        conflicting: &str,
    ) -> Result<String> {
        match request.existing_po_id {
            // Update conflict: another purchase order already owns the new
            // number. The number stored on OUR row is the winner; keep it.
            Some(po_id) => {
                let current = self
                    .db
                    .get_purchase_order(po_id)
                    .await
                    .map_err(StockflowError::Internal)?
                    .ok_or_else(|| {
                        StockflowError::business(format!("purchase order {po_id} disappeared"))
                    })?;
                Ok(current.number)
            }
            // Create conflict: probe numbered suffixes, then fall back to a
            // timestamp that cannot collide
            None => {
                for candidate in suffix_candidates(conflicting) {
                    let taken = self
                        .db
                        .get_po_by_number(request.merchant_id, &candidate)
                        .await
                        .map_err(StockflowError::Internal)?;
                    if taken.is_none() {
                        return Ok(candidate);
                    }
                }
                Ok(format!("{conflicting}-{}", Utc::now().timestamp_millis()))
            }
        }
    }
}

/// The ten probe candidates tried before the timestamp fallback
pub fn suffix_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    (1..=SUFFIX_PROBE_LIMIT).map(move |i| format!("{base}-{i}"))
}

/// The line totals should reconcile with the document total within 0.01
/// per item; mismatches are logged, never fatal
fn check_totals(document: &ExtractedDocument) {
    let Some(total) = document.totals.as_ref().and_then(|t| t.subtotal.or(t.total)) else {
        return;
    };
    let sum: f64 = document
        .line_items
        .iter()
        .filter_map(|i| i.total_cost)
        .sum();
    let tolerance = TOTALS_TOLERANCE_PER_ITEM * document.line_items.len() as f64;
    if (sum - total).abs() > tolerance {
        warn!(
            document_total = total,
            line_item_sum = sum,
            tolerance,
            "line item totals do not reconcile with the document total"
        );
    }
}

fn map_tx_error(err: sqlx::Error, request: &PersistRequest, number: &str) -> StockflowError {
    if let sqlx::Error::Database(db) = &err {
        let unique_violation = db.code().as_deref() == Some("23505");
        let on_number = db
            .constraint()
            .map(|c| c.contains("merchant_id_number"))
            .unwrap_or(false);
        if unique_violation && on_number {
            return StockflowError::Conflict {
                merchant_id: request.merchant_id,
                number: number.to_string(),
            };
        }
    }
    if crate::gateway::is_transient(&err) {
        return StockflowError::transient(format!("persistence transaction: {err}"));
    }
    StockflowError::Internal(anyhow::anyhow!("persistence transaction: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::extraction::{DocumentTotals, ExtractedLineItem, SupplierStub};

    #[test]
    fn suffix_candidates_cover_one_through_ten() {
        let candidates: Vec<String> = suffix_candidates("1142384989090").collect();
        assert_eq!(candidates.len(), 10);
        assert_eq!(candidates[0], "1142384989090-1");
        assert_eq!(candidates[9], "1142384989090-10");
    }

    #[test]
    fn totals_check_tolerates_per_item_drift() {
        // 3 items, tolerance 0.03: a 2-cent drift must not warn (and must
        // never panic either way)
        let document = ExtractedDocument {
            number: Some("1001".into()),
            supplier: SupplierStub::default(),
            line_items: vec![
                ExtractedLineItem {
                    sku: None,
                    product_name: "A".into(),
                    description: None,
                    quantity: 1,
                    unit_cost: Some(10.0),
                    total_cost: Some(10.0),
                },
                ExtractedLineItem {
                    sku: None,
                    product_name: "B".into(),
                    description: None,
                    quantity: 1,
                    unit_cost: Some(10.0),
                    total_cost: Some(10.01),
                },
                ExtractedLineItem {
                    sku: None,
                    product_name: "C".into(),
                    description: None,
                    quantity: 1,
                    unit_cost: Some(10.0),
                    total_cost: Some(10.01),
                },
            ],
            totals: Some(DocumentTotals {
                subtotal: Some(30.0),
                tax: None,
                total: Some(30.0),
            }),
            currency: None,
        };
        check_totals(&document);
    }
}
