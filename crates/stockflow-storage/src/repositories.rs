// Repository layer for database operations
//
// Thin typed wrappers over raw SQL. Anything that must run inside the
// bounded persistence transaction lives in po_writer, not here.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use stockflow_core::MerchantSettings;

use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============================================
    // Merchants
    // ============================================

    pub async fn get_merchant(&self, id: Uuid) -> Result<Option<MerchantRow>> {
        let row = sqlx::query_as::<_, MerchantRow>(
            r#"
            SELECT id, name, settings, created_at, updated_at
            FROM merchants
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Parsed settings map; missing merchants read as all-defaults
    pub async fn merchant_settings(&self, id: Uuid) -> Result<MerchantSettings> {
        let merchant = self.get_merchant(id).await?;
        Ok(merchant
            .map(|m| MerchantSettings::from_value(&m.settings))
            .unwrap_or_default())
    }

    // ============================================
    // Uploads
    // ============================================

    pub async fn create_upload(&self, input: CreateUpload) -> Result<UploadRow> {
        let row = sqlx::query_as::<_, UploadRow>(
            r#"
            INSERT INTO uploads (id, merchant_id, file_name, content_ref, byte_size)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, merchant_id, file_name, content_ref, byte_size, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.merchant_id)
        .bind(&input.file_name)
        .bind(&input.content_ref)
        .bind(input.byte_size)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_upload(&self, id: Uuid) -> Result<Option<UploadRow>> {
        let row = sqlx::query_as::<_, UploadRow>(
            r#"
            SELECT id, merchant_id, file_name, content_ref, byte_size, created_at
            FROM uploads
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Suppliers
    // ============================================

    pub async fn create_supplier(&self, input: CreateSupplier) -> Result<SupplierRow> {
        let row = sqlx::query_as::<_, SupplierRow>(
            r#"
            INSERT INTO suppliers (id, merchant_id, name, name_normalized, contact_email, contact_phone, website, address, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active')
            RETURNING id, merchant_id, name, name_normalized, contact_email, contact_phone, website, address, status, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.merchant_id)
        .bind(&input.name)
        .bind(&input.name_normalized)
        .bind(&input.contact_email)
        .bind(&input.contact_phone)
        .bind(&input.website)
        .bind(&input.address)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_supplier(&self, id: Uuid) -> Result<Option<SupplierRow>> {
        let row = sqlx::query_as::<_, SupplierRow>(
            r#"
            SELECT id, merchant_id, name, name_normalized, contact_email, contact_phone, website, address, status, created_at, updated_at
            FROM suppliers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_active_suppliers(&self, merchant_id: Uuid) -> Result<Vec<SupplierRow>> {
        let rows = sqlx::query_as::<_, SupplierRow>(
            r#"
            SELECT id, merchant_id, name, name_normalized, contact_email, contact_phone, website, address, status, created_at, updated_at
            FROM suppliers
            WHERE merchant_id = $1 AND status = 'active'
            ORDER BY name
            "#,
        )
        .bind(merchant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Purchase orders + line items
    // ============================================

    pub async fn get_purchase_order(&self, id: Uuid) -> Result<Option<PurchaseOrderRow>> {
        let row = sqlx::query_as::<_, PurchaseOrderRow>(
            r#"
            SELECT id, merchant_id, number, supplier_id, status, job_status, total_amount, currency, confidence, raw_data, created_at, updated_at
            FROM purchase_orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_po_by_number(
        &self,
        merchant_id: Uuid,
        number: &str,
    ) -> Result<Option<PurchaseOrderRow>> {
        let row = sqlx::query_as::<_, PurchaseOrderRow>(
            r#"
            SELECT id, merchant_id, number, supplier_id, status, job_status, total_amount, currency, confidence, raw_data, created_at, updated_at
            FROM purchase_orders
            WHERE merchant_id = $1 AND number = $2
            "#,
        )
        .bind(merchant_id)
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Terminal statuses are sticky: a completed or failed purchase order is
    /// never re-opened by a later write
    pub async fn update_po_status(
        &self,
        id: Uuid,
        status: PoStatus,
        job_status: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE purchase_orders
            SET status = $2,
                job_status = COALESCE($3, job_status),
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(job_status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_po_supplier(&self, id: Uuid, supplier_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE purchase_orders
            SET supplier_id = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(supplier_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn po_line_item_count(&self, purchase_order_id: Uuid) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM po_line_items WHERE purchase_order_id = $1")
                .bind(purchase_order_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    pub async fn list_line_items(&self, purchase_order_id: Uuid) -> Result<Vec<LineItemRow>> {
        let rows = sqlx::query_as::<_, LineItemRow>(
            r#"
            SELECT id, purchase_order_id, sku, product_name, description, quantity, unit_cost, total_cost, confidence, raw_line
            FROM po_line_items
            WHERE purchase_order_id = $1
            ORDER BY id
            "#,
        )
        .bind(purchase_order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_line_items_by_ids(&self, ids: &[Uuid]) -> Result<Vec<LineItemRow>> {
        let rows = sqlx::query_as::<_, LineItemRow>(
            r#"
            SELECT id, purchase_order_id, sku, product_name, description, quantity, unit_cost, total_cost, confidence, raw_line
            FROM po_line_items
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Product drafts + images
    // ============================================

    /// Create or reuse the draft for a line item; `line_item_id` is unique
    /// so duplicate stage runs converge on one row
    pub async fn upsert_product_draft(&self, input: UpsertProductDraft) -> Result<ProductDraftRow> {
        let tags = serde_json::to_value(&input.tags)?;
        let row = sqlx::query_as::<_, ProductDraftRow>(
            r#"
            INSERT INTO product_drafts (
                id, merchant_id, session_id, purchase_order_id, line_item_id, supplier_id,
                original_title, refined_title, original_description, refined_description,
                original_price, price_refined, status, tags, category_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'DRAFT', $13, $14)
            ON CONFLICT (line_item_id) DO UPDATE SET
                refined_title = COALESCE(EXCLUDED.refined_title, product_drafts.refined_title),
                refined_description = COALESCE(EXCLUDED.refined_description, product_drafts.refined_description),
                price_refined = COALESCE(EXCLUDED.price_refined, product_drafts.price_refined),
                tags = EXCLUDED.tags,
                category_id = COALESCE(EXCLUDED.category_id, product_drafts.category_id),
                updated_at = NOW()
            RETURNING id, merchant_id, session_id, purchase_order_id, line_item_id, supplier_id,
                      original_title, refined_title, original_description, refined_description,
                      original_price, price_refined, status, external_product_id, external_variant_id,
                      tags, category_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.merchant_id)
        .bind(input.session_id)
        .bind(input.purchase_order_id)
        .bind(input.line_item_id)
        .bind(input.supplier_id)
        .bind(&input.original_title)
        .bind(&input.refined_title)
        .bind(&input.original_description)
        .bind(&input.refined_description)
        .bind(input.original_price)
        .bind(input.price_refined)
        .bind(&tags)
        .bind(&input.category_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_drafts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ProductDraftRow>> {
        let rows = sqlx::query_as::<_, ProductDraftRow>(
            r#"
            SELECT id, merchant_id, session_id, purchase_order_id, line_item_id, supplier_id,
                   original_title, refined_title, original_description, refined_description,
                   original_price, price_refined, status, external_product_id, external_variant_id,
                   tags, category_id, created_at, updated_at
            FROM product_drafts
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn update_draft_status(&self, id: Uuid, status: DraftStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE product_drafts
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_draft_external_ids(
        &self,
        id: Uuid,
        external_product_id: &str,
        external_variant_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE product_drafts
            SET external_product_id = $2,
                external_variant_id = $3,
                status = 'SYNCED',
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(external_product_id)
        .bind(external_variant_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the image candidates for a draft in one shot
    pub async fn replace_draft_images(
        &self,
        draft_id: Uuid,
        images: &[CreateProductImage],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM product_images WHERE draft_id = $1")
            .bind(draft_id)
            .execute(&mut *tx)
            .await?;

        if !images.is_empty() {
            let ids: Vec<Uuid> = images.iter().map(|_| Uuid::now_v7()).collect();
            let urls: Vec<String> = images.iter().map(|i| i.url.clone()).collect();
            let domains: Vec<String> = images.iter().map(|i| i.source_domain.clone()).collect();
            let confidences: Vec<f64> = images.iter().map(|i| i.confidence).collect();
            let positions: Vec<i32> = images.iter().map(|i| i.position).collect();

            sqlx::query(
                r#"
                INSERT INTO product_images (id, draft_id, url, source_domain, confidence, position)
                SELECT unnest($1::uuid[]), $2, unnest($3::text[]), unnest($4::text[]), unnest($5::float8[]), unnest($6::int4[])
                "#,
            )
            .bind(&ids)
            .bind(draft_id)
            .bind(&urls)
            .bind(&domains)
            .bind(&confidences)
            .bind(&positions)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_draft_images(&self, draft_id: Uuid) -> Result<Vec<ProductImageRow>> {
        let rows = sqlx::query_as::<_, ProductImageRow>(
            r#"
            SELECT id, draft_id, url, source_domain, confidence, position
            FROM product_images
            WHERE draft_id = $1
            ORDER BY position
            "#,
        )
        .bind(draft_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Merchant sessions
    // ============================================

    pub async fn find_session(&self, merchant_id: Uuid) -> Result<Option<MerchantSessionRow>> {
        let row = sqlx::query_as::<_, MerchantSessionRow>(
            r#"
            SELECT id, merchant_id, kind, created_at
            FROM merchant_sessions
            WHERE merchant_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn create_session(&self, merchant_id: Uuid, kind: &str) -> Result<MerchantSessionRow> {
        let row = sqlx::query_as::<_, MerchantSessionRow>(
            r#"
            INSERT INTO merchant_sessions (id, merchant_id, kind)
            VALUES ($1, $2, $3)
            RETURNING id, merchant_id, kind, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(merchant_id)
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Workflow executions
    // ============================================

    pub async fn create_workflow_execution(
        &self,
        input: CreateWorkflowExecution,
    ) -> Result<WorkflowExecutionRow> {
        let row = sqlx::query_as::<_, WorkflowExecutionRow>(
            r#"
            INSERT INTO workflow_executions (workflow_id, merchant_id, upload_id, current_stage, status, progress_percent, execution_mode, retry_counts, metadata)
            VALUES ($1, $2, $3, 'ai_parsing', 'pending', 0, $4, '{}'::jsonb, $5)
            RETURNING workflow_id, merchant_id, upload_id, purchase_order_id, current_stage, status, progress_percent, execution_mode, retry_counts, metadata, created_at, updated_at
            "#,
        )
        .bind(&input.workflow_id)
        .bind(input.merchant_id)
        .bind(input.upload_id)
        .bind(input.execution_mode.as_str())
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Dedup probe: an in-flight workflow for the same upload within the
    /// window means the caller reuses that id instead of starting another
    pub async fn find_recent_workflow_for_upload(
        &self,
        upload_id: Uuid,
        merchant_id: Uuid,
        window_secs: i64,
    ) -> Result<Option<WorkflowExecutionRow>> {
        let row = sqlx::query_as::<_, WorkflowExecutionRow>(
            r#"
            SELECT workflow_id, merchant_id, upload_id, purchase_order_id, current_stage, status, progress_percent, execution_mode, retry_counts, metadata, created_at, updated_at
            FROM workflow_executions
            WHERE upload_id = $1
              AND merchant_id = $2
              AND created_at > NOW() - make_interval(secs => $3::float8)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(upload_id)
        .bind(merchant_id)
        .bind(window_secs as f64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowExecutionRow>> {
        let row = sqlx::query_as::<_, WorkflowExecutionRow>(
            r#"
            SELECT workflow_id, merchant_id, upload_id, purchase_order_id, current_stage, status, progress_percent, execution_mode, retry_counts, metadata, created_at, updated_at
            FROM workflow_executions
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Stage-entry write: stage pointer, progress, processing status, and the
    /// purchase order id once stage 2 has minted it
    pub async fn update_workflow_progress(
        &self,
        workflow_id: &str,
        current_stage: &str,
        progress_percent: i32,
        purchase_order_id: Option<Uuid>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_executions
            SET current_stage = $2,
                progress_percent = $3,
                purchase_order_id = COALESCE($4, purchase_order_id),
                status = 'processing',
                updated_at = NOW()
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(current_stage)
        .bind(progress_percent)
        .bind(purchase_order_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// One terminal write per workflow
    pub async fn set_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        progress_percent: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2, progress_percent = $3, updated_at = NOW()
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(status.as_str())
        .bind(progress_percent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_workflow_mode(&self, workflow_id: &str, mode: ExecutionMode) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_executions
            SET execution_mode = $2, updated_at = NOW()
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(mode.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Increment the per-stage attempt counter, returning the new count
    pub async fn bump_retry_count(&self, workflow_id: &str, stage: &str) -> Result<u32> {
        let (count,): (i32,) = sqlx::query_as(
            r#"
            UPDATE workflow_executions
            SET retry_counts = jsonb_set(
                    COALESCE(retry_counts, '{}'::jsonb),
                    ARRAY[$2],
                    to_jsonb(COALESCE((retry_counts ->> $2)::int, 0) + 1),
                    true
                ),
                updated_at = NOW()
            WHERE workflow_id = $1
            RETURNING (retry_counts ->> $2)::int
            "#,
        )
        .bind(workflow_id)
        .bind(stage)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u32)
    }

    /// Workflows the queue substrate failed to advance: pending or processing
    /// with no write for longer than the stuck threshold
    pub async fn list_stuck_workflows(
        &self,
        stuck_threshold_secs: i64,
        limit: i64,
    ) -> Result<Vec<WorkflowExecutionRow>> {
        let rows = sqlx::query_as::<_, WorkflowExecutionRow>(
            r#"
            SELECT workflow_id, merchant_id, upload_id, purchase_order_id, current_stage, status, progress_percent, execution_mode, retry_counts, metadata, created_at, updated_at
            FROM workflow_executions
            WHERE status IN ('pending', 'processing')
              AND updated_at < NOW() - make_interval(secs => $1::float8)
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(stuck_threshold_secs as f64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Stage audit + stage store
    // ============================================

    pub async fn start_stage_execution(
        &self,
        workflow_id: &str,
        stage_name: &str,
        progress: i32,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO workflow_stage_executions (workflow_id, stage_name, status, progress, started_at)
            VALUES ($1, $2, 'running', $3, NOW())
            RETURNING id
            "#,
        )
        .bind(workflow_id)
        .bind(stage_name)
        .bind(progress)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn complete_stage_execution(&self, id: i64, progress: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_stage_executions
            SET status = 'completed', progress = $2, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(progress)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fail_stage_execution(&self, id: i64, error_message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_stage_executions
            SET status = 'failed', completed_at = NOW(), error_message = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_stage_executions(&self, workflow_id: &str) -> Result<Vec<WorkflowStageRow>> {
        let rows = sqlx::query_as::<_, WorkflowStageRow>(
            r#"
            SELECT id, workflow_id, stage_name, status, progress, started_at, completed_at, error_message
            FROM workflow_stage_executions
            WHERE workflow_id = $1
            ORDER BY id
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Single-writer per key: only the owning workflow writes its blobs
    pub async fn put_stage_data(
        &self,
        workflow_id: &str,
        stage_name: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_stage_data (workflow_id, stage_name, payload, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (workflow_id, stage_name)
            DO UPDATE SET payload = EXCLUDED.payload, updated_at = NOW()
            "#,
        )
        .bind(workflow_id)
        .bind(stage_name)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_stage_data(
        &self,
        workflow_id: &str,
        stage_name: &str,
    ) -> Result<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            r#"
            SELECT payload
            FROM workflow_stage_data
            WHERE workflow_id = $1 AND stage_name = $2
            "#,
        )
        .bind(workflow_id)
        .bind(stage_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(payload,)| payload))
    }

    /// Stage 10 cleanup: drop all accumulated blobs for the workflow
    pub async fn clear_stage_data(&self, workflow_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM workflow_stage_data WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // Performance metrics
    // ============================================

    pub async fn insert_performance_metric(&self, input: CreatePerformanceMetric) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO performance_metrics (id, merchant_id, operation, engine, duration_ms, result_count, success, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.merchant_id)
        .bind(&input.operation)
        .bind(&input.engine)
        .bind(input.duration_ms)
        .bind(input.result_count)
        .bind(input.success)
        .bind(&input.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn metric_summary(
        &self,
        merchant_id: Option<Uuid>,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricSummaryRow>> {
        let rows = sqlx::query_as::<_, MetricSummaryRow>(
            r#"
            SELECT operation, engine,
                   COUNT(*) AS calls,
                   AVG(duration_ms)::float8 AS avg_duration_ms,
                   PERCENTILE_CONT(0.95) WITHIN GROUP (ORDER BY duration_ms)::float8 AS p95_duration_ms,
                   SUM(CASE WHEN success THEN 0 ELSE 1 END) AS failures
            FROM performance_metrics
            WHERE created_at >= $1
              AND ($2::uuid IS NULL OR merchant_id = $2)
            GROUP BY operation, engine
            ORDER BY operation, engine
            "#,
        )
        .bind(since)
        .bind(merchant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn engine_adoption(&self, since: DateTime<Utc>) -> Result<Vec<AdoptionRow>> {
        let rows = sqlx::query_as::<_, AdoptionRow>(
            r#"
            SELECT engine,
                   COUNT(*) AS calls,
                   COUNT(DISTINCT merchant_id) AS merchants
            FROM performance_metrics
            WHERE created_at >= $1
            GROUP BY engine
            ORDER BY engine
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn recent_metric_errors(&self, limit: i64) -> Result<Vec<PerformanceMetricRow>> {
        let rows = sqlx::query_as::<_, PerformanceMetricRow>(
            r#"
            SELECT id, merchant_id, operation, engine, duration_ms, result_count, success, metadata, created_at
            FROM performance_metrics
            WHERE success = false
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn recent_metrics(&self, limit: i64) -> Result<Vec<PerformanceMetricRow>> {
        let rows = sqlx::query_as::<_, PerformanceMetricRow>(
            r#"
            SELECT id, merchant_id, operation, engine, duration_ms, result_count, success, metadata, created_at
            FROM performance_metrics
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn cleanup_metrics(&self, older_than_days: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM performance_metrics
            WHERE created_at < NOW() - make_interval(days => $1::int)
            "#,
        )
        .bind(older_than_days as i32)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Aggregated view for the analyze-performance CLI
#[derive(Debug, Clone, FromRow)]
pub struct MetricSummaryRow {
    pub operation: String,
    pub engine: String,
    pub calls: i64,
    pub avg_duration_ms: Option<f64>,
    pub p95_duration_ms: Option<f64>,
    pub failures: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct AdoptionRow {
    pub engine: String,
    pub calls: i64,
    pub merchants: i64,
}
