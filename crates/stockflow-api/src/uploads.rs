// Upload hand-off: create the upload record and start its workflow

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use stockflow_storage::CreateUpload;
use stockflow_worker::StartWorkflowRequest;

use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    pub merchant_id: Uuid,
    pub file_name: String,
    /// Document bytes, base64-encoded; small documents only
    #[serde(default)]
    pub content_base64: Option<String>,
    /// Reference to already-stored bytes (object key); wins over inline
    #[serde(default)]
    pub content_ref: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadResponse {
    pub upload_id: Uuid,
    pub workflow_id: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/uploads", post(create_upload))
        .with_state(state)
}

/// POST /api/uploads - register a document and start its workflow
#[utoipa::path(
    post,
    path = "/api/uploads",
    request_body = CreateUploadRequest,
    responses(
        (status = 201, description = "Workflow started", body = CreateUploadResponse),
        (status = 400, description = "Missing or invalid content"),
        (status = 500, description = "Internal server error")
    ),
    tag = "stockflow"
)]
pub async fn create_upload(
    State(state): State<AppState>,
    Json(request): Json<CreateUploadRequest>,
) -> Result<(StatusCode, Json<CreateUploadResponse>), StatusCode> {
    let (content_ref, byte_size) = match (&request.content_ref, &request.content_base64) {
        (Some(reference), _) => (reference.clone(), 0),
        (None, Some(encoded)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|_| StatusCode::BAD_REQUEST)?;
            (format!("base64:{encoded}"), bytes.len() as i64)
        }
        (None, None) => return Err(StatusCode::BAD_REQUEST),
    };

    let upload = state
        .db
        .create_upload(CreateUpload {
            merchant_id: request.merchant_id,
            file_name: request.file_name,
            content_ref,
            byte_size,
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "upload insert failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let workflow_id = state
        .orchestrator
        .start_workflow(StartWorkflowRequest {
            upload_id: upload.id,
            merchant_id: request.merchant_id,
            metadata: serde_json::json!({ "fileName": upload.file_name }),
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "workflow start failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateUploadResponse {
            upload_id: upload.id,
            workflow_id,
        }),
    ))
}
