// Workflow status polling routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use stockflow_storage::{WorkflowExecutionRow, WorkflowStageRow};

use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
    pub workflow_id: String,
    pub merchant_id: Uuid,
    pub upload_id: Option<Uuid>,
    pub purchase_order_id: Option<Uuid>,
    pub current_stage: String,
    pub status: String,
    pub progress_percent: i32,
    pub execution_mode: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkflowExecutionRow> for WorkflowView {
    fn from(row: WorkflowExecutionRow) -> Self {
        Self {
            workflow_id: row.workflow_id,
            merchant_id: row.merchant_id,
            upload_id: row.upload_id,
            purchase_order_id: row.purchase_order_id,
            current_stage: row.current_stage,
            status: row.status,
            progress_percent: row.progress_percent,
            execution_mode: row.execution_mode,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageExecutionView {
    pub stage_name: String,
    pub status: String,
    pub progress: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl From<WorkflowStageRow> for StageExecutionView {
    fn from(row: WorkflowStageRow) -> Self {
        Self {
            stage_name: row.stage_name,
            status: row.status,
            progress: row.progress,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/workflows/:workflow_id", get(get_workflow))
        .route("/api/workflows/:workflow_id/stages", get(list_workflow_stages))
        .with_state(state)
}

/// GET /api/workflows/{workflow_id} - current workflow state
#[utoipa::path(
    get,
    path = "/api/workflows/{workflow_id}",
    params(("workflow_id" = String, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow state", body = WorkflowView),
        (status = 404, description = "Unknown workflow")
    ),
    tag = "stockflow"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowView>, StatusCode> {
    let row = state
        .db
        .get_workflow(&workflow_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "workflow lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(row.into()))
}

/// GET /api/workflows/{workflow_id}/stages - per-stage attempt log
#[utoipa::path(
    get,
    path = "/api/workflows/{workflow_id}/stages",
    params(("workflow_id" = String, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Stage attempts", body = [StageExecutionView])
    ),
    tag = "stockflow"
)]
pub async fn list_workflow_stages(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Vec<StageExecutionView>>, StatusCode> {
    let rows = state
        .db
        .list_stage_executions(&workflow_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "stage log lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}
