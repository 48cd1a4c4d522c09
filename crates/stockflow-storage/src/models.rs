// Database models (internal rows, may differ from public DTOs)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Status enums (stored as text)
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoStatus {
    Processing,
    ReviewNeeded,
    Completed,
    Failed,
}

impl PoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoStatus::Processing => "processing",
            PoStatus::ReviewNeeded => "review_needed",
            PoStatus::Completed => "completed",
            PoStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> PoStatus {
        match s {
            "review_needed" => PoStatus::ReviewNeeded,
            "completed" => PoStatus::Completed,
            "failed" => PoStatus::Failed,
            _ => PoStatus::Processing,
        }
    }

    /// Status transitions are one-way: once terminal, a workflow never
    /// re-opens the purchase order
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoStatus::Completed | PoStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DraftStatus {
    Draft,
    PendingReview,
    Approved,
    Rejected,
    Syncing,
    Synced,
    Failed,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Draft => "DRAFT",
            DraftStatus::PendingReview => "PENDING_REVIEW",
            DraftStatus::Approved => "APPROVED",
            DraftStatus::Rejected => "REJECTED",
            DraftStatus::Syncing => "SYNCING",
            DraftStatus::Synced => "SYNCED",
            DraftStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Processing => "processing",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> WorkflowStatus {
        match s {
            "processing" => WorkflowStatus::Processing,
            "completed" => WorkflowStatus::Completed,
            "failed" => WorkflowStatus::Failed,
            _ => WorkflowStatus::Pending,
        }
    }
}

/// Queued workflows hop between invocations via the stage queues;
/// sequential ones chain stages inside a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Queued,
    Sequential,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Queued => "queued",
            ExecutionMode::Sequential => "sequential",
        }
    }

    pub fn from_str(s: &str) -> ExecutionMode {
        match s {
            "sequential" => ExecutionMode::Sequential,
            _ => ExecutionMode::Queued,
        }
    }
}

// ============================================
// Tenant + document rows
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct MerchantRow {
    pub id: Uuid,
    pub name: String,
    pub settings: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub file_name: String,
    /// Opaque reference to the stored bytes (object key or data URI)
    pub content_ref: String,
    pub byte_size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUpload {
    pub merchant_id: Uuid,
    pub file_name: String,
    pub content_ref: String,
    pub byte_size: i64,
}

// ============================================
// Purchase orders
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct PurchaseOrderRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub number: String,
    pub supplier_id: Option<Uuid>,
    pub status: String,
    pub job_status: Option<String>,
    pub total_amount: Option<f64>,
    pub currency: Option<String>,
    pub confidence: Option<f64>,
    pub raw_data: Option<sqlx::types::JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LineItemRow {
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub sku: Option<String>,
    pub product_name: String,
    pub description: Option<String>,
    pub quantity: i64,
    pub unit_cost: f64,
    pub total_cost: f64,
    pub confidence: Option<f64>,
    pub raw_line: sqlx::types::JsonValue,
}

// ============================================
// Suppliers
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SupplierRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub name: String,
    pub name_normalized: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a supplier; `name_normalized` is computed by the
/// caller pre-write so the rule lives in one place
#[derive(Debug, Clone)]
pub struct CreateSupplier {
    pub merchant_id: Uuid,
    pub name: String,
    pub name_normalized: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
}

// ============================================
// Product drafts + images
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ProductDraftRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub session_id: Uuid,
    pub purchase_order_id: Uuid,
    pub line_item_id: Uuid,
    pub supplier_id: Option<Uuid>,
    pub original_title: String,
    pub refined_title: Option<String>,
    pub original_description: Option<String>,
    pub refined_description: Option<String>,
    pub original_price: f64,
    pub price_refined: Option<f64>,
    pub status: String,
    pub external_product_id: Option<String>,
    pub external_variant_id: Option<String>,
    pub tags: sqlx::types::JsonValue,
    pub category_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UpsertProductDraft {
    pub merchant_id: Uuid,
    pub session_id: Uuid,
    pub purchase_order_id: Uuid,
    pub line_item_id: Uuid,
    pub supplier_id: Option<Uuid>,
    pub original_title: String,
    pub refined_title: Option<String>,
    pub original_description: Option<String>,
    pub refined_description: Option<String>,
    pub original_price: f64,
    pub price_refined: Option<f64>,
    pub tags: Vec<String>,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProductImageRow {
    pub id: Uuid,
    pub draft_id: Uuid,
    pub url: String,
    pub source_domain: String,
    pub confidence: f64,
    pub position: i32,
}

#[derive(Debug, Clone)]
pub struct CreateProductImage {
    pub draft_id: Uuid,
    pub url: String,
    pub source_domain: String,
    pub confidence: f64,
    pub position: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct MerchantSessionRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Workflow execution
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowExecutionRow {
    pub workflow_id: String,
    pub merchant_id: Uuid,
    pub upload_id: Option<Uuid>,
    pub purchase_order_id: Option<Uuid>,
    pub current_stage: String,
    pub status: String,
    pub progress_percent: i32,
    pub execution_mode: String,
    /// Map stage name -> attempt count
    pub retry_counts: sqlx::types::JsonValue,
    pub metadata: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecutionRow {
    pub fn retry_count(&self, stage: &str) -> u32 {
        self.retry_counts
            .get(stage)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    }
}

#[derive(Debug, Clone)]
pub struct CreateWorkflowExecution {
    pub workflow_id: String,
    pub merchant_id: Uuid,
    pub upload_id: Option<Uuid>,
    pub execution_mode: ExecutionMode,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowStageRow {
    pub id: i64,
    pub workflow_id: String,
    pub stage_name: String,
    pub status: String,
    pub progress: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StageDataRow {
    pub workflow_id: String,
    pub stage_name: String,
    pub payload: sqlx::types::JsonValue,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Observability rows
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct PerformanceMetricRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub operation: String,
    pub engine: String,
    pub duration_ms: i64,
    pub result_count: i32,
    pub success: bool,
    pub metadata: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreatePerformanceMetric {
    pub merchant_id: Uuid,
    pub operation: String,
    pub engine: String,
    pub duration_ms: i64,
    pub result_count: i32,
    pub success: bool,
    pub metadata: serde_json::Value,
}

/// One row per persistence-service commit
#[derive(Debug, Clone, FromRow)]
pub struct ProcessingAuditRow {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub purchase_order_id: Uuid,
    pub upload_id: Option<Uuid>,
    pub confidence: f64,
    pub line_item_count: i32,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn po_status_round_trips() {
        for status in [
            PoStatus::Processing,
            PoStatus::ReviewNeeded,
            PoStatus::Completed,
            PoStatus::Failed,
        ] {
            assert_eq!(PoStatus::from_str(status.as_str()), status);
        }
        assert!(PoStatus::Completed.is_terminal());
        assert!(!PoStatus::ReviewNeeded.is_terminal());
    }

    #[test]
    fn retry_count_reads_the_json_map() {
        let row = WorkflowExecutionRow {
            workflow_id: "wf_1".into(),
            merchant_id: Uuid::now_v7(),
            upload_id: None,
            purchase_order_id: None,
            current_stage: "ai_parsing".into(),
            status: "processing".into(),
            progress_percent: 5,
            execution_mode: "queued".into(),
            retry_counts: serde_json::json!({"ai_parsing": 2}),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(row.retry_count("ai_parsing"), 2);
        assert_eq!(row.retry_count("database_save"), 0);
    }
}
