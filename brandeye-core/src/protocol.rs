//! JSON contracts spoken between the orchestrator and its collaborators

use crate::types::{Detection, GroupSummary, GroupedDetection, OcrToken};
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `POST /detect` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    pub image: String,
}

/// `POST /detect` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    pub success: bool,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_shape: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /group` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRequest {
    pub image: String,
    pub detections: Vec<Detection>,
}

/// `POST /group` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResponse {
    pub success: bool,
    #[serde(default)]
    pub grouped_detections: Vec<GroupedDetection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /visualize` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizeRequest {
    pub image: String,
    pub detections: Vec<GroupedDetection>,
}

/// `POST /visualize` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /ocr` request sent by the grouping service for one crop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrRequest {
    pub image: String,
}

/// `POST /ocr` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResponse {
    pub success: bool,
    #[serde(default)]
    pub tokens: Vec<OcrToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /embed` request: one entry per crop, answered in the same order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub images: Vec<String>,
}

/// `POST /embed` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub success: bool,
    #[serde(default)]
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /health` body of every collaborator. Capability flags are kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
    #[serde(default)]
    pub service: String,
    #[serde(flatten)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,
}

impl ServiceHealth {
    pub fn healthy(service: impl Into<String>) -> Self {
        Self {
            status: "healthy".to_string(),
            service: service.into(),
            capabilities: serde_json::Map::new(),
        }
    }

    pub fn with_capability(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.capabilities.insert(key.to_string(), value.into());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

/// `POST /process` success body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub result_image: String,
    pub products_count: usize,
    pub groups_count: usize,
    pub processing_time: f64,
    /// Keys are group ids rendered as strings
    pub groups: BTreeMap<String, usize>,
    pub detections: Vec<GroupedDetection>,
}

impl ProcessResponse {
    pub fn groups_from_summary(summary: &GroupSummary) -> BTreeMap<String, usize> {
        summary
            .iter()
            .map(|(id, count)| (id.to_string(), *count))
            .collect()
    }
}

/// Orchestrator `GET /health` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeHealthResponse {
    pub status: String,
    pub services: BTreeMap<String, bool>,
}

/// Body of every failed response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

pub fn encode_image(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 image payload, enforcing a size ceiling on the decoded bytes.
pub fn decode_image(payload: &str, max_bytes: usize) -> Result<Vec<u8>> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidImage("empty image payload".to_string()));
    }
    // Browsers send data URLs; keep only the base64 part
    let data = match trimmed.split_once(";base64,") {
        Some((_, data)) => data,
        None => trimmed,
    };
    // Cheap upper bound before allocating: 4 base64 chars per 3 bytes
    if data.len() / 4 * 3 > max_bytes + 3 {
        return Err(Error::InvalidImage(format!(
            "image exceeds {} bytes",
            max_bytes
        )));
    }
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| Error::InvalidImage(format!("invalid base64: {}", e)))?;
    if bytes.len() > max_bytes {
        return Err(Error::InvalidImage(format!(
            "image exceeds {} bytes",
            max_bytes
        )));
    }
    Ok(bytes)
}
