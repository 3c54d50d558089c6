// Orchestrator HTTP surface

use crate::error::PipelineError;
use crate::pipeline::PipelineOrchestrator;
use crate::worker_pool::WorkerPool;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use brandeye_core::protocol::ErrorResponse;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub workers: WorkerPool,
    pub results_dir: PathBuf,
}

impl AppState {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, workers: WorkerPool, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            orchestrator,
            workers,
            results_dir: results_dir.into(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    // Multipart framing adds a little on top of the image itself
    let body_limit = state.orchestrator.max_image_bytes() + 64 * 1024;
    let results = ServeDir::new(&state.results_dir);

    Router::new()
        .route("/process", post(process_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest_service("/static/results", results)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        error_response(status, self.to_string())
    }
}

/// Pull the `image` field out of the upload
async fn read_image_field(mut multipart: Multipart) -> Result<Vec<u8>, Response> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(error_response(StatusCode::BAD_REQUEST, "No image file provided")),
            Err(e) => {
                warn!("Malformed multipart upload: {}", e);
                return Err(error_response(StatusCode::BAD_REQUEST, format!("Malformed upload: {}", e)));
            }
        };
        if field.name() != Some("image") {
            continue;
        }
        if field.file_name() == Some("") {
            return Err(error_response(StatusCode::BAD_REQUEST, "No image selected"));
        }
        return match field.bytes().await {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) => Err(error_response(StatusCode::BAD_REQUEST, format!("Malformed upload: {}", e))),
        };
    }
}

async fn process_handler(State(state): State<AppState>, multipart: Multipart) -> Response {
    let image = match read_image_field(multipart).await {
        Ok(image) => image,
        Err(response) => return response,
    };

    let _worker = match state.workers.acquire().await {
        Ok(worker) => {
            state.orchestrator.metrics().record_worker_wait(worker.wait_time());
            worker
        }
        Err(e) => {
            warn!("Rejecting request: {}", e);
            state.orchestrator.metrics().record_rejected();
            return e.into_response();
        }
    };

    match state.orchestrator.process(&image).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.orchestrator.health().check_all().await;
    Json(snapshot.to_response())
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.orchestrator.metrics().render_prometheus(),
    )
}
