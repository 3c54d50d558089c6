//! Detect → group → visualize, as an explicit state machine

use crate::client::{DetectionClient, DetectionSource, GroupingClient, ServiceEndpoint, VisualizationClient};
use crate::error::{PipelineError, Result, Stage};
use crate::fallback::DetectionFallback;
use crate::health_monitor::HealthMonitor;
use crate::metrics::Metrics;
use brandeye_core::protocol::{encode_image, GroupRequest, ProcessResponse, VisualizeRequest};
use brandeye_core::{group_summary, BrandEyeConfig, Detection, GroupedDetection};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a run ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    ServiceUnavailable(Stage),
    Timeout(Stage),
    InvalidImage,
    StageFailed(Stage),
    Busy,
    Internal,
}

impl From<&PipelineError> for FailureCause {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::ServiceUnavailable(stage) => FailureCause::ServiceUnavailable(*stage),
            PipelineError::Timeout { stage, .. } => FailureCause::Timeout(*stage),
            PipelineError::InvalidImage(_) => FailureCause::InvalidImage,
            PipelineError::StageFailed { stage, .. }
            | PipelineError::Transport { stage, .. }
            | PipelineError::Protocol { stage, .. } => FailureCause::StageFailed(*stage),
            PipelineError::Busy(_) => FailureCause::Busy,
            PipelineError::InvalidTransition { .. } | PipelineError::Internal(_) => FailureCause::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Detecting,
    Grouping,
    Visualizing,
    Completed,
    Failed(FailureCause),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed(_))
    }

    /// Forward one step, or to `Failed` from any non-terminal state
    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Received, Detecting)
            | (Detecting, Grouping)
            | (Grouping, Visualizing)
            | (Visualizing, Completed) => true,
            (from, Failed(_)) => !from.is_terminal(),
            _ => false,
        }
    }

    /// The collaborator stage this state waits on
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Detecting => Some(Stage::Detection),
            PipelineState::Grouping => Some(Stage::Grouping),
            PipelineState::Visualizing => Some(Stage::Visualization),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Received => f.write_str("received"),
            PipelineState::Detecting => f.write_str("detecting"),
            PipelineState::Grouping => f.write_str("grouping"),
            PipelineState::Visualizing => f.write_str("visualizing"),
            PipelineState::Completed => f.write_str("completed"),
            PipelineState::Failed(cause) => write!(f, "failed({:?})", cause),
        }
    }
}

/// Bookkeeping for one `/process` request
#[derive(Debug)]
pub struct PipelineRun {
    id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    state: PipelineState,
    trail: Vec<PipelineState>,
    stage_timings: BTreeMap<Stage, Duration>,
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            started: Instant::now(),
            state: PipelineState::Received,
            trail: vec![PipelineState::Received],
            stage_timings: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state the run has been in, oldest first
    pub fn trail(&self) -> &[PipelineState] {
        &self.trail
    }

    pub fn stage_timings(&self) -> &BTreeMap<Stage, Duration> {
        &self.stage_timings
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn advance(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("[{}] {} -> {}", self.id, self.state, next);
        self.state = next;
        self.trail.push(next);
        Ok(())
    }

    /// Move to `Failed`; a run that already ended keeps its terminal state
    pub fn fail(&mut self, err: &PipelineError) {
        let next = PipelineState::Failed(FailureCause::from(err));
        if self.state.can_transition_to(&next) {
            self.state = next;
            self.trail.push(next);
        }
    }

    fn record_timing(&mut self, stage: Stage, elapsed: Duration) {
        self.stage_timings.insert(stage, elapsed);
    }
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub detection: Duration,
    pub grouping: Duration,
    pub visualization: Duration,
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Detection => self.detection,
            Stage::Grouping => self.grouping,
            Stage::Visualization => self.visualization,
        }
    }
}

/// Reject uploads that are empty, oversized or not a recognised image format
pub fn validate_image(bytes: &[u8], max_bytes: usize) -> Result<()> {
    if bytes.is_empty() {
        return Err(PipelineError::InvalidImage("empty upload".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(PipelineError::InvalidImage(format!(
            "image is {} bytes, limit is {}",
            bytes.len(),
            max_bytes
        )));
    }
    image::guess_format(bytes)
        .map(|_| ())
        .map_err(|_| PipelineError::InvalidImage("unrecognised image format".to_string()))
}

/// Round to two decimals for the `processing_time` field
fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

/// Grouping must return one entry per input and ids `0..k` with none skipped
fn check_grouping_contract(expected: usize, grouped: &[GroupedDetection]) -> Result<()> {
    if grouped.len() != expected {
        return Err(PipelineError::Protocol {
            stage: Stage::Grouping,
            message: format!("expected {} grouped detections, got {}", expected, grouped.len()),
        });
    }
    let summary = group_summary(grouped);
    if summary.keys().enumerate().any(|(position, id)| position != *id) {
        return Err(PipelineError::Protocol {
            stage: Stage::Grouping,
            message: format!(
                "group ids are not contiguous from 0: {:?}",
                summary.keys().collect::<Vec<_>>()
            ),
        });
    }
    Ok(())
}

pub struct PipelineOrchestrator {
    detection: DetectionClient,
    grouping: GroupingClient,
    visualization: VisualizationClient,
    fallback: Option<DetectionFallback>,
    health: Arc<HealthMonitor>,
    metrics: Arc<Metrics>,
    timeouts: StageTimeouts,
    max_image_bytes: usize,
}

impl PipelineOrchestrator {
    pub fn from_config(config: &BrandEyeConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let connect = config.timeouts.connect();
        let detection = ServiceEndpoint::new(Stage::Detection, &config.services.detection_url, connect)?;
        let grouping = ServiceEndpoint::new(Stage::Grouping, &config.services.grouping_url, connect)?;
        let visualization =
            ServiceEndpoint::new(Stage::Visualization, &config.services.visualization_url, connect)?;

        let health = Arc::new(HealthMonitor::new(
            vec![detection.clone(), grouping.clone(), visualization.clone()],
            config.health.probe_timeout(),
        ));

        let fallback = match &config.detection.fallback_url {
            Some(url) => {
                let secondary = ServiceEndpoint::new(Stage::Detection, url, connect)?;
                let source: Arc<dyn DetectionSource> = Arc::new(DetectionClient::new(secondary));
                Some(DetectionFallback::new(
                    source,
                    config.detection.min_expected_detections,
                    config.detection.overlap_threshold,
                ))
            }
            None => None,
        };

        Ok(Self {
            detection: DetectionClient::new(detection),
            grouping: GroupingClient::new(grouping),
            visualization: VisualizationClient::new(visualization),
            fallback,
            health,
            metrics,
            timeouts: StageTimeouts {
                detection: config.timeouts.detection(),
                grouping: config.timeouts.grouping(),
                visualization: config.timeouts.visualization(),
            },
            max_image_bytes: config.artifacts.max_image_bytes,
        })
    }

    /// Replace the secondary detection strategy
    pub fn with_fallback(mut self, fallback: Option<DetectionFallback>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn max_image_bytes(&self) -> usize {
        self.max_image_bytes
    }

    /// Run the whole pipeline over one uploaded image
    pub async fn process(&self, image: &[u8]) -> Result<ProcessResponse> {
        let mut run = PipelineRun::new();
        self.metrics.record_request_started();
        info!("[{}] Pipeline started ({} bytes)", run.id(), image.len());

        match self.execute(&mut run, image).await {
            Ok(response) => {
                self.metrics.record_success(run.elapsed());
                info!(
                    "[{}] Pipeline completed: {} products in {} groups, {:.2}s {:?}",
                    run.id(),
                    response.products_count,
                    response.groups_count,
                    response.processing_time,
                    run.stage_timings()
                );
                Ok(response)
            }
            Err(e) => {
                run.fail(&e);
                self.metrics.record_failure(e.stage());
                warn!("[{}] Pipeline failed in state {}: {}", run.id(), run.state(), e);
                Err(e)
            }
        }
    }

    async fn execute(&self, run: &mut PipelineRun, image: &[u8]) -> Result<ProcessResponse> {
        validate_image(image, self.max_image_bytes)?;
        let encoded = encode_image(image);

        run.advance(PipelineState::Detecting)?;
        let detections = self
            .run_stage(run, Stage::Detection, |deadline| self.detect_with_fallback(&encoded, deadline))
            .await?;
        if detections.is_empty() {
            info!("[{}] No products detected", run.id());
        }

        run.advance(PipelineState::Grouping)?;
        let grouped = self
            .run_stage(run, Stage::Grouping, |_| self.group(&encoded, detections))
            .await?;

        run.advance(PipelineState::Visualizing)?;
        let result_image = self
            .run_stage(run, Stage::Visualization, |_| self.visualize(&encoded, &grouped))
            .await?;

        run.advance(PipelineState::Completed)?;

        let summary = group_summary(&grouped);
        Ok(ProcessResponse {
            success: true,
            result_image,
            products_count: grouped.len(),
            groups_count: summary.len(),
            processing_time: round_secs(run.elapsed()),
            groups: ProcessResponse::groups_from_summary(&summary),
            detections: grouped,
        })
    }

    /// Health pre-check, then the stage bounded by its timeout. `work` receives the
    /// stage deadline so follow-up calls inside the stage share one budget.
    async fn run_stage<T, W, F>(&self, run: &mut PipelineRun, stage: Stage, work: W) -> Result<T>
    where
        W: FnOnce(tokio::time::Instant) -> F,
        F: Future<Output = Result<T>>,
    {
        if !self.health.check(stage).await {
            return Err(PipelineError::ServiceUnavailable(stage));
        }

        let limit = self.timeouts.for_stage(stage);
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + limit;
        let outcome = tokio::time::timeout_at(deadline, work(deadline)).await;
        let elapsed = started.elapsed();
        run.record_timing(stage, elapsed);
        self.metrics.record_stage(stage, elapsed);
        debug!("[{}] {} took {:?}", run.id(), stage, elapsed);

        match outcome {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout { stage, after: limit }),
        }
    }

    /// Primary detection, supplemented by the secondary source within what is left
    /// of the detection budget
    async fn detect_with_fallback(&self, encoded: &str, deadline: tokio::time::Instant) -> Result<Vec<Detection>> {
        let primary = self.detect(encoded).await?;
        match &self.fallback {
            Some(fallback) => Ok(fallback.supplement(encoded, primary, deadline).await),
            None => Ok(primary),
        }
    }

    async fn detect(&self, encoded: &str) -> Result<Vec<Detection>> {
        let response = self.detection.detect(encoded).await?;
        if !response.success {
            return Err(PipelineError::StageFailed {
                stage: Stage::Detection,
                message: response
                    .error
                    .unwrap_or_else(|| "detection reported failure".to_string()),
            });
        }
        if let Some(method) = &response.method_used {
            debug!("Detection method: {}", method);
        }

        let total = response.detections.len();
        let valid: Vec<Detection> = response
            .detections
            .into_iter()
            .filter(|d| match d.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Dropping detection: {}", e);
                    false
                }
            })
            .collect();
        if valid.len() < total {
            warn!("Dropped {} of {} detections", total - valid.len(), total);
        }
        Ok(valid)
    }

    async fn group(&self, encoded: &str, detections: Vec<Detection>) -> Result<Vec<GroupedDetection>> {
        let expected = detections.len();
        let request = GroupRequest {
            image: encoded.to_string(),
            detections,
        };
        let response = self.grouping.group(&request).await?;
        if !response.success {
            return Err(PipelineError::StageFailed {
                stage: Stage::Grouping,
                message: response
                    .error
                    .unwrap_or_else(|| "grouping reported failure".to_string()),
            });
        }
        check_grouping_contract(expected, &response.grouped_detections)?;
        Ok(response.grouped_detections)
    }

    async fn visualize(&self, encoded: &str, grouped: &[GroupedDetection]) -> Result<String> {
        let request = VisualizeRequest {
            image: encoded.to_string(),
            detections: grouped.to_vec(),
        };
        let response = self.visualization.visualize(&request).await?;
        if !response.success {
            return Err(PipelineError::StageFailed {
                stage: Stage::Visualization,
                message: response
                    .error
                    .unwrap_or_else(|| "visualization reported failure".to_string()),
            });
        }
        match response.result_image {
            Some(path) if !path.trim().is_empty() => Ok(path),
            _ => Err(PipelineError::Protocol {
                stage: Stage::Visualization,
                message: "missing result_image".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandeye_core::BBox;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn grouped(group_id: usize) -> GroupedDetection {
        Detection::new(BBox::new(0, 0, 10, 10).unwrap(), 0.9).into_grouped(
            group_id,
            None,
            format!("Group {}", group_id),
        )
    }

    #[test]
    fn test_forward_transitions() {
        let mut run = PipelineRun::new();
        assert_eq!(run.state(), PipelineState::Received);
        run.advance(PipelineState::Detecting).unwrap();
        run.advance(PipelineState::Grouping).unwrap();
        run.advance(PipelineState::Visualizing).unwrap();
        run.advance(PipelineState::Completed).unwrap();
        assert_eq!(run.trail().len(), 5);
        assert!(run.state().is_terminal());
    }

    #[test]
    fn test_skipping_a_stage_is_rejected() {
        let mut run = PipelineRun::new();
        let err = run.advance(PipelineState::Grouping).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
        assert_eq!(run.state(), PipelineState::Received);
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal() {
        for state in [
            PipelineState::Received,
            PipelineState::Detecting,
            PipelineState::Grouping,
            PipelineState::Visualizing,
        ] {
            assert!(state.can_transition_to(&PipelineState::Failed(FailureCause::Internal)));
        }
        assert!(!PipelineState::Completed.can_transition_to(&PipelineState::Failed(FailureCause::Internal)));
        let failed = PipelineState::Failed(FailureCause::Busy);
        assert!(!failed.can_transition_to(&PipelineState::Detecting));
    }

    #[test]
    fn test_fail_records_cause_once() {
        let mut run = PipelineRun::new();
        run.advance(PipelineState::Detecting).unwrap();
        run.fail(&PipelineError::Timeout { stage: Stage::Detection, after: Duration::from_secs(30) });
        assert_eq!(run.state(), PipelineState::Failed(FailureCause::Timeout(Stage::Detection)));

        run.fail(&PipelineError::Internal("later".into()));
        assert_eq!(run.state(), PipelineState::Failed(FailureCause::Timeout(Stage::Detection)));
        assert_eq!(run.trail().len(), 3);
    }

    #[test]
    fn test_transport_errors_count_as_stage_failures() {
        let err = PipelineError::Protocol { stage: Stage::Grouping, message: "bad".into() };
        assert_eq!(FailureCause::from(&err), FailureCause::StageFailed(Stage::Grouping));
    }

    #[test]
    fn test_validate_image() {
        assert!(validate_image(PNG_MAGIC, 1024).is_ok());
        assert!(matches!(validate_image(&[], 1024), Err(PipelineError::InvalidImage(_))));
        assert!(matches!(validate_image(b"plain text, not an image", 1024), Err(PipelineError::InvalidImage(_))));
        assert!(matches!(validate_image(PNG_MAGIC, 4), Err(PipelineError::InvalidImage(_))));
    }

    #[test]
    fn test_round_secs() {
        assert_eq!(round_secs(Duration::from_millis(1234)), 1.23);
        assert_eq!(round_secs(Duration::from_millis(1236)), 1.24);
        assert_eq!(round_secs(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_grouping_contract() {
        assert!(check_grouping_contract(0, &[]).is_ok());
        assert!(check_grouping_contract(3, &[grouped(0), grouped(1), grouped(0)]).is_ok());
        assert!(check_grouping_contract(2, &[grouped(0)]).is_err());
        assert!(check_grouping_contract(2, &[grouped(0), grouped(2)]).is_err());
        assert!(check_grouping_contract(1, &[grouped(1)]).is_err());
    }

    #[test]
    fn test_stage_timeouts_lookup() {
        let timeouts = StageTimeouts {
            detection: Duration::from_secs(30),
            grouping: Duration::from_secs(60),
            visualization: Duration::from_secs(30),
        };
        assert_eq!(timeouts.for_stage(Stage::Grouping), Duration::from_secs(60));
        assert_eq!(PipelineState::Visualizing.stage(), Some(Stage::Visualization));
        assert_eq!(PipelineState::Completed.stage(), None);
    }
}
