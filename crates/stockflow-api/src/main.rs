// Stockflow API server
//
// Thin inbound surface for the pipeline: upload hand-off, the SSE event
// stream, and workflow status polling. Stage processing itself runs in the
// stockflow-worker binary; this process only starts workflows and reads.

mod events;
mod uploads;
mod workflows;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use stockflow_core::StockflowConfig;
use stockflow_queue::{Broker, ProgressBus, RedisBroker};
use stockflow_storage::{Database, Gateway};
use stockflow_worker::{Orchestrator, WorkerContext};

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub bus: ProgressBus,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health goes through the same gateway path as real queries; a cold pool
/// can never answer healthy
async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthResponse>, axum::http::StatusCode> {
    sqlx::query("SELECT 1")
        .execute(state.db.pool())
        .await
        .map_err(|_| axum::http::StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        uploads::create_upload,
        workflows::get_workflow,
        workflows::list_workflow_stages,
    ),
    components(schemas(
        uploads::CreateUploadRequest,
        uploads::CreateUploadResponse,
        workflows::WorkflowView,
        workflows::StageExecutionView,
    )),
    tags((name = "stockflow", description = "Purchase order ingestion pipeline"))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "stockflow_api=info,stockflow_worker=info,tower_http=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StockflowConfig::from_env().context("configuration")?;

    let gateway = Gateway::connect(&config.database_url)
        .await
        .context("database gateway")?;
    let db = gateway.client().await.context("database warmup")?;

    let broker: Arc<dyn Broker> = Arc::new(
        RedisBroker::connect(&config.broker_url)
            .await
            .context("broker")?,
    );
    let bus = ProgressBus::new(broker.clone());

    let ctx = WorkerContext::new(config, &gateway, broker.clone())
        .await
        .context("worker context")?;
    let orchestrator = Orchestrator::new(ctx);

    let state = AppState {
        db,
        bus,
        orchestrator,
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(
            Router::new()
                .route("/health", get(health))
                .with_state(state.clone()),
        )
        .merge(uploads::routes(state.clone()))
        .merge(events::routes(state.clone()))
        .merge(workflows::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr, "stockflow api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .context("server")?;

    broker.close().await.ok();
    info!("stockflow api stopped");
    Ok(())
}
