// Configuration system for BrandEye services

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Distance used when clustering embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
}

/// Orchestrator HTTP server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Pipeline runs allowed in flight at once
    pub max_concurrent_requests: usize,
    /// How long a request may wait for a free pipeline worker
    pub worker_acquire_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            max_concurrent_requests: 16,
            worker_acquire_timeout_ms: 5_000,
        }
    }
}

/// Collaborator base URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub detection_url: String,
    pub grouping_url: String,
    pub visualization_url: String,
    /// OCR collaborator used by the grouping service; absent means no OCR
    pub ocr_url: Option<String>,
    /// Feature-extraction collaborator used by the grouping service
    pub embedding_url: Option<String>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            detection_url: "http://localhost:5001".to_string(),
            grouping_url: "http://localhost:5002".to_string(),
            visualization_url: "http://localhost:5003".to_string(),
            ocr_url: None,
            embedding_url: None,
        }
    }
}

/// Per-stage time budgets, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub detection_ms: u64,
    pub grouping_ms: u64,
    pub visualization_ms: u64,
    pub ocr_ms: u64,
    pub embedding_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            detection_ms: 30_000,
            grouping_ms: 60_000,
            visualization_ms: 30_000,
            ocr_ms: 10_000,
            embedding_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn detection(&self) -> Duration {
        Duration::from_millis(self.detection_ms)
    }

    pub fn grouping(&self) -> Duration {
        Duration::from_millis(self.grouping_ms)
    }

    pub fn visualization(&self) -> Duration {
        Duration::from_millis(self.visualization_ms)
    }

    pub fn ocr(&self) -> Duration {
        Duration::from_millis(self.ocr_ms)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }
}

/// Liveness probing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_timeout_ms: u64,
    /// Background polling interval; 0 disables polling
    pub poll_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            poll_interval_secs: 0,
        }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Grouping engine and grouping service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    pub bind_address: String,
    pub port: u16,
    /// Brand similarity at or above this value is a match
    pub match_threshold: f64,
    /// OCR tokens recognized with less confidence are ignored
    pub min_token_confidence: f32,
    pub cluster_eps: f64,
    /// Neighbours (the point itself included) needed for a core point
    pub cluster_min_points: usize,
    pub distance_metric: DistanceMetric,
    pub standardize_embeddings: bool,
    /// Concurrent OCR / embedding calls shared by all requests
    pub inference_concurrency: usize,
    pub inference_acquire_timeout_ms: u64,
    /// Brand catalogue file (JSON, TOML or YAML); built-in catalogue when unset
    pub brand_database: Option<String>,
    pub max_detections: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5002,
            match_threshold: 0.6,
            min_token_confidence: 0.3,
            cluster_eps: 0.5,
            cluster_min_points: 2,
            distance_metric: DistanceMetric::Euclidean,
            standardize_embeddings: true,
            inference_concurrency: 2,
            inference_acquire_timeout_ms: 10_000,
            brand_database: None,
            max_detections: 500,
        }
    }
}

impl GroupingConfig {
    pub fn inference_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_acquire_timeout_ms)
    }
}

/// Detection stage acceptance and fallback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Primary result is accepted when it has at least this many detections
    pub min_expected_detections: usize,
    /// Secondary boxes overlapping a primary box above this IoU are discarded
    pub overlap_threshold: f64,
    /// Secondary detection collaborator, consulted only when the primary result is rejected
    pub fallback_url: Option<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_expected_detections: 3,
            overlap_threshold: 0.3,
            fallback_url: None,
        }
    }
}

/// Uploaded images and produced artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub results_dir: String,
    pub max_image_bytes: usize,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            results_dir: "static/results".to_string(),
            max_image_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete BrandEye configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandEyeConfig {
    pub server: ServerConfig,
    pub services: ServicesConfig,
    pub timeouts: TimeoutConfig,
    pub health: HealthConfig,
    pub grouping: GroupingConfig,
    pub detection: DetectionConfig,
    pub artifacts: ArtifactConfig,
    pub logging: LoggingConfig,
}

impl BrandEyeConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from string (JSON, TOML or YAML)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<BrandEyeConfig>(content) {
            return Ok(config);
        }

        let toml_err = match toml::from_str::<BrandEyeConfig>(content) {
            Ok(config) => return Ok(config),
            Err(e) => e,
        };

        if let Ok(config) = serde_yaml::from_str::<BrandEyeConfig>(content) {
            return Ok(config);
        }

        Err(ConfigError::ParseError(format!(
            "not valid JSON, TOML or YAML ({})",
            toml_err.to_string().trim()
        )))
    }

    /// Apply `BRANDEYE_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup; keys are the `BRANDEYE_*` variable names
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("BRANDEYE_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(host) = lookup("BRANDEYE_BIND_ADDRESS") {
            self.server.bind_address = host.clone();
            self.grouping.bind_address = host;
        }
        if let Some(port) = lookup("BRANDEYE_GROUPING_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.grouping.port = port;
        }
        if let Some(url) = lookup("BRANDEYE_DETECTION_URL") {
            self.services.detection_url = url;
        }
        if let Some(url) = lookup("BRANDEYE_GROUPING_URL") {
            self.services.grouping_url = url;
        }
        if let Some(url) = lookup("BRANDEYE_VISUALIZATION_URL") {
            self.services.visualization_url = url;
        }
        if let Some(url) = lookup("BRANDEYE_OCR_URL") {
            self.services.ocr_url = Some(url);
        }
        if let Some(url) = lookup("BRANDEYE_EMBEDDING_URL") {
            self.services.embedding_url = Some(url);
        }
        if let Some(url) = lookup("BRANDEYE_FALLBACK_DETECTION_URL") {
            self.detection.fallback_url = Some(url);
        }
        if let Some(path) = lookup("BRANDEYE_BRAND_DATABASE") {
            self.grouping.brand_database = Some(path);
        }
        if let Some(dir) = lookup("BRANDEYE_RESULTS_DIR") {
            self.artifacts.results_dir = dir;
        }
        if let Some(level) = lookup("BRANDEYE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 || self.grouping.port == 0 {
            return Err(ConfigError::ValidationError(
                "ports cannot be 0".to_string(),
            ));
        }

        if self.server.max_concurrent_requests == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_concurrent_requests must be > 0".to_string(),
            ));
        }

        for (name, url) in [
            ("services.detection_url", &self.services.detection_url),
            ("services.grouping_url", &self.services.grouping_url),
            ("services.visualization_url", &self.services.visualization_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }

        let t = &self.timeouts;
        if [t.connect_ms, t.detection_ms, t.grouping_ms, t.visualization_ms, t.ocr_ms, t.embedding_ms]
            .contains(&0)
            || self.health.probe_timeout_ms == 0
        {
            return Err(ConfigError::ValidationError(
                "timeouts must be > 0".to_string(),
            ));
        }

        let g = &self.grouping;
        if !(0.0..=1.0).contains(&g.match_threshold) {
            return Err(ConfigError::ValidationError(
                "grouping.match_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&g.min_token_confidence) {
            return Err(ConfigError::ValidationError(
                "grouping.min_token_confidence must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(g.cluster_eps.is_finite() && g.cluster_eps > 0.0) {
            return Err(ConfigError::ValidationError(
                "grouping.cluster_eps must be > 0".to_string(),
            ));
        }
        if g.cluster_min_points == 0 {
            return Err(ConfigError::ValidationError(
                "grouping.cluster_min_points must be >= 1".to_string(),
            ));
        }
        if g.inference_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "grouping.inference_concurrency must be >= 1".to_string(),
            ));
        }
        if g.max_detections == 0 {
            return Err(ConfigError::ValidationError(
                "grouping.max_detections must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.overlap_threshold) {
            return Err(ConfigError::ValidationError(
                "detection.overlap_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.artifacts.max_image_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "artifacts.max_image_bytes must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}
