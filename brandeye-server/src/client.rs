// HTTP clients for the detection, grouping and visualization collaborators

use crate::error::{PipelineError, Result, Stage};
use async_trait::async_trait;
use brandeye_core::protocol::{
    DetectRequest, DetectResponse, ErrorResponse, GroupRequest, GroupResponse, ServiceHealth,
    VisualizeRequest, VisualizeResponse,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

/// Base URL of one collaborator plus the client used to reach it.
///
/// No overall request timeout is set here; the orchestrator bounds each stage.
#[derive(Clone)]
pub struct ServiceEndpoint {
    stage: Stage,
    base_url: String,
    client: reqwest::Client,
}

impl ServiceEndpoint {
    pub fn new(stage: Stage, base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| PipelineError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            stage,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `GET /health`: healthy only on a 2xx reply whose JSON `status` is "healthy"
    pub async fn probe(&self, timeout: Duration) -> bool {
        let response = match self.client.get(self.url("health")).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("{} health probe failed: {}", self.stage, e);
                return false;
            }
        };
        if !response.status().is_success() {
            debug!("{} health probe returned HTTP {}", self.stage, response.status());
            return false;
        }
        match response.json::<ServiceHealth>().await {
            Ok(health) => health.is_healthy(),
            Err(e) => {
                debug!("{} health probe returned unreadable body: {}", self.stage, e);
                false
            }
        }
    }

    pub async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let stage = self.stage;
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|source| PipelineError::Transport { stage, source })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| PipelineError::Transport { stage, source })?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&bytes)
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("{} service responded with HTTP {}", stage, status));
            return Err(PipelineError::StageFailed { stage, message });
        }

        serde_json::from_slice(&bytes).map_err(|e| PipelineError::Protocol {
            stage,
            message: e.to_string(),
        })
    }
}

/// Anything that can answer `POST /detect`
#[async_trait]
pub trait DetectionSource: Send + Sync {
    fn describe(&self) -> &str;

    async fn detect(&self, image_b64: &str) -> Result<DetectResponse>;
}

pub struct DetectionClient {
    endpoint: ServiceEndpoint,
}

impl DetectionClient {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl DetectionSource for DetectionClient {
    fn describe(&self) -> &str {
        self.endpoint.base_url()
    }

    async fn detect(&self, image_b64: &str) -> Result<DetectResponse> {
        let request = DetectRequest { image: image_b64.to_string() };
        self.endpoint.post_json("detect", &request).await
    }
}

pub struct GroupingClient {
    endpoint: ServiceEndpoint,
}

impl GroupingClient {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    pub async fn group(&self, request: &GroupRequest) -> Result<GroupResponse> {
        self.endpoint.post_json("group", request).await
    }
}

pub struct VisualizationClient {
    endpoint: ServiceEndpoint,
}

impl VisualizationClient {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    pub async fn visualize(&self, request: &VisualizeRequest) -> Result<VisualizeResponse> {
        self.endpoint.post_json("visualize", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(stage: Stage, url: &str) -> ServiceEndpoint {
        ServiceEndpoint::new(stage, url, Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn test_probe_healthy() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status": "healthy", "service": "detection", "yolo_available": true}"#)
            .create_async()
            .await;
        assert!(endpoint(Stage::Detection, &server.url()).probe(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_probe_unhealthy_status_field() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status": "degraded"}"#)
            .create_async()
            .await;
        assert!(!endpoint(Stage::Grouping, &server.url()).probe(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_probe_non_2xx() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/health")
            .with_status(503)
            .with_body(r#"{"status": "healthy"}"#)
            .create_async()
            .await;
        assert!(!endpoint(Stage::Grouping, &server.url()).probe(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_probe_no_response() {
        let ep = ServiceEndpoint::new(Stage::Visualization, "http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(!ep.probe(Duration::from_millis(300)).await);
    }

    #[tokio::test]
    async fn test_post_json_error_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/detect")
            .with_status(500)
            .with_body(r#"{"success": false, "error": "model crashed"}"#)
            .create_async()
            .await;
        let client = DetectionClient::new(endpoint(Stage::Detection, &server.url()));
        match client.detect("aGVsbG8=").await {
            Err(PipelineError::StageFailed { stage, message }) => {
                assert_eq!(stage, Stage::Detection);
                assert_eq!(message, "model crashed");
            }
            other => panic!("Expected StageFailed, got {:?}", other.map(|r| r.success)),
        }
    }

    #[tokio::test]
    async fn test_post_json_garbage_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/visualize")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;
        let client = VisualizationClient::new(endpoint(Stage::Visualization, &server.url()));
        let request = VisualizeRequest { image: String::new(), detections: Vec::new() };
        assert!(matches!(
            client.visualize(&request).await,
            Err(PipelineError::Protocol { stage: Stage::Visualization, .. })
        ));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let ep = endpoint(Stage::Grouping, "http://grouping:5002/");
        assert_eq!(ep.url("/group"), "http://grouping:5002/group");
    }
}
