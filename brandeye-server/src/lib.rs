//! brandeye-server: pipeline orchestrator for BrandEye
//!
//! Accepts shelf photographs on `POST /process`, runs them through the detection,
//! grouping and visualization collaborators in order, and reports the grouped
//! detections. Collaborator liveness is exposed on `GET /health`.

pub mod error;
pub mod client;
pub mod health_monitor;
pub mod fallback;
pub mod pipeline;
pub mod worker_pool;
pub mod metrics;
pub mod http;

pub use error::{PipelineError, Stage};
pub use health_monitor::{HealthMonitor, HealthSnapshot};
pub use pipeline::{FailureCause, PipelineOrchestrator, PipelineRun, PipelineState};
pub use http::{create_router, AppState};
pub use metrics::Metrics;
pub use worker_pool::WorkerPool;
