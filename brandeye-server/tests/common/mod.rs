// Fake collaborators shared by the orchestrator integration tests
#![allow(dead_code)]

use axum::routing::{get, post};
use axum::{Json, Router};
use brandeye_core::BrandEyeConfig;
use mockito::{Mock, ServerGuard};
use serde_json::{json, Value};
use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

pub const DETECTIONS: &str = r#"{
    "success": true,
    "detections": [
        {"bbox": [0, 0, 40, 80], "confidence": 0.91},
        {"bbox": [50, 0, 90, 80], "confidence": 0.84}
    ],
    "image_shape": [80, 100, 3],
    "method_used": "YOLO"
}"#;

pub const GROUPED: &str = r#"{
    "success": true,
    "grouped_detections": [
        {"bbox": [0, 0, 40, 80], "confidence": 0.91, "group_id": 0, "brand_name": "Kotex", "group_name": "Kotex"},
        {"bbox": [50, 0, 90, 80], "confidence": 0.84, "group_id": 1, "group_name": "Group 1"}
    ]
}"#;

pub const VISUALIZED: &str = r#"{"success": true, "result_image": "/static/results/result_1700000000.jpg"}"#;

pub fn shelf_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 30, 30]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// A mockito collaborator whose `/health` reports `healthy`
pub async fn collaborator(service: &str, healthy: bool) -> (ServerGuard, Mock) {
    let mut server = mockito::Server::new_async().await;
    let (status, body) = if healthy {
        (200, json!({"status": "healthy", "service": service}))
    } else {
        (503, json!({"status": "unhealthy", "service": service}))
    };
    let mock = server
        .mock("GET", "/health")
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;
    (server, mock)
}

pub async fn reply(server: &mut ServerGuard, path: &str, status: usize, body: &str) -> Mock {
    server
        .mock("POST", path)
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

pub fn config(detection: &str, grouping: &str, visualization: &str) -> BrandEyeConfig {
    let mut config = BrandEyeConfig::default();
    config.services.detection_url = detection.to_string();
    config.services.grouping_url = grouping.to_string();
    config.services.visualization_url = visualization.to_string();
    config.timeouts.connect_ms = 500;
    config.timeouts.detection_ms = 2_000;
    config.timeouts.grouping_ms = 2_000;
    config.timeouts.visualization_ms = 2_000;
    config.health.probe_timeout_ms = 1_000;
    config
}

/// An in-process collaborator that answers `path` only after `delay`
pub async fn slow_collaborator(path: &'static str, delay: Duration, body: Value) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy"})) }))
        .route(
            path,
            post(move || {
                let body = body.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    Json(body)
                }
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}
