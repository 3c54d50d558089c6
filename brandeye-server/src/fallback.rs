//! Secondary detection pass for sparse primary results

use crate::client::DetectionSource;
use brandeye_core::Detection;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// A primary detection result is accepted once it reaches `min_expected` boxes
pub fn accepts(count: usize, min_expected: usize) -> bool {
    count >= min_expected
}

/// Append every secondary box whose IoU with each primary box stays at or below
/// `overlap_threshold`. Secondary boxes are compared against the primary set only.
pub fn merge_detections(
    mut primary: Vec<Detection>,
    secondary: Vec<Detection>,
    overlap_threshold: f64,
) -> Vec<Detection> {
    let primary_len = primary.len();
    for candidate in secondary {
        let overlaps = primary[..primary_len]
            .iter()
            .any(|existing| existing.bbox.iou(&candidate.bbox) > overlap_threshold);
        if !overlaps {
            primary.push(candidate);
        }
    }
    primary
}

pub struct DetectionFallback {
    secondary: Arc<dyn DetectionSource>,
    min_expected: usize,
    overlap_threshold: f64,
}

impl DetectionFallback {
    pub fn new(secondary: Arc<dyn DetectionSource>, min_expected: usize, overlap_threshold: f64) -> Self {
        Self {
            secondary,
            min_expected,
            overlap_threshold,
        }
    }

    pub fn min_expected(&self) -> usize {
        self.min_expected
    }

    /// Returns the primary detections unchanged when they pass the acceptance
    /// predicate, or when the secondary source fails or misses `deadline`.
    pub async fn supplement(&self, image_b64: &str, primary: Vec<Detection>, deadline: Instant) -> Vec<Detection> {
        if accepts(primary.len(), self.min_expected) {
            return primary;
        }

        info!(
            "Primary detection found {} products (< {}), consulting {}",
            primary.len(),
            self.min_expected,
            self.secondary.describe()
        );

        let response = match tokio::time::timeout_at(deadline, self.secondary.detect(image_b64)).await {
            Ok(Ok(response)) if response.success => response,
            Ok(Ok(response)) => {
                warn!(
                    "Secondary detection reported failure: {}",
                    response.error.unwrap_or_else(|| "unknown error".to_string())
                );
                return primary;
            }
            Ok(Err(e)) => {
                warn!("Secondary detection failed: {}", e);
                return primary;
            }
            Err(_) => {
                warn!("Secondary detection ran out of the detection budget");
                return primary;
            }
        };

        let candidates: Vec<Detection> = response
            .detections
            .into_iter()
            .filter(|d| d.validate().is_ok())
            .collect();
        let before = primary.len();
        let merged = merge_detections(primary, candidates, self.overlap_threshold);
        info!("Secondary detection added {} products", merged.len() - before);
        merged
    }
}
