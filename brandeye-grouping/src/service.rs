// HTTP surface of the grouping service: POST /group, GET /health

use crate::engine::GroupingEngine;
use crate::error::GroupingError;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use brandeye_core::protocol::{ErrorResponse, GroupRequest, GroupResponse, ServiceHealth};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub const SERVICE_NAME: &str = "grouping";

/// Create the grouping router around a shared engine
pub fn create_router(engine: Arc<GroupingEngine>) -> Router {
    // base64 inflates by 4/3; leave headroom for the detection list
    let body_limit = engine.max_image_bytes() / 3 * 4 + 1024 * 1024;

    Router::new()
        .route("/group", post(group_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn health_handler(State(engine): State<Arc<GroupingEngine>>) -> impl IntoResponse {
    Json(
        ServiceHealth::healthy(SERVICE_NAME)
            .with_capability("ocr_available", engine.ocr_available())
            .with_capability("embedding_available", engine.embedding_available())
            .with_capability("brands", engine.brand_count()),
    )
}

async fn group_handler(
    State(engine): State<Arc<GroupingEngine>>,
    payload: Result<Json<GroupRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            warn!("Rejected /group payload: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match engine.group_request(request).await {
        Ok(assembly) => Json(GroupResponse {
            success: true,
            grouped_detections: assembly.detections,
            error: None,
        })
        .into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Grouping failed: {}", e);
            } else {
                warn!("Grouping request refused: {}", e);
            }
            error_response(status, e.to_string())
        }
    }
}

fn status_for(err: &GroupingError) -> StatusCode {
    match err {
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        GroupingError::Collaborator(_) | GroupingError::Network(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}
