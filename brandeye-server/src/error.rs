//! Pipeline errors and their HTTP mapping

use axum::http::StatusCode;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One collaborator stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Detection,
    Grouping,
    Visualization,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Detection, Stage::Grouping, Stage::Visualization];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Detection => "detection",
            Stage::Grouping => "grouping",
            Stage::Visualization => "visualization",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0} service unavailable")]
    ServiceUnavailable(Stage),

    #[error("{stage} stage timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("{stage} failed: {message}")]
    StageFailed { stage: Stage, message: String },

    #[error("{stage} service communication error: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: reqwest::Error,
    },

    #[error("{stage} returned an invalid response: {message}")]
    Protocol { stage: Stage, message: String },

    #[error("Server busy: {0}")]
    Busy(String),

    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::ServiceUnavailable(stage)
            | PipelineError::Timeout { stage, .. }
            | PipelineError::StageFailed { stage, .. }
            | PipelineError::Transport { stage, .. }
            | PipelineError::Protocol { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            PipelineError::ServiceUnavailable(_) | PipelineError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::StageFailed { .. }
            | PipelineError::Transport { .. }
            | PipelineError::Protocol { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::InvalidTransition { .. } | PipelineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Detection.to_string(), "detection");
        assert_eq!(serde_json::to_string(&Stage::Visualization).unwrap(), "\"visualization\"");
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::ServiceUnavailable(Stage::Grouping);
        assert_eq!(err.to_string(), "grouping service unavailable");

        let err = PipelineError::Timeout { stage: Stage::Detection, after: Duration::from_secs(30) };
        assert!(err.to_string().contains("detection stage timed out"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(PipelineError::InvalidImage("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            PipelineError::ServiceUnavailable(Stage::Detection).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(PipelineError::Busy("x".into()).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            PipelineError::Timeout { stage: Stage::Grouping, after: Duration::from_secs(60) }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            PipelineError::StageFailed { stage: Stage::Visualization, message: "x".into() }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(PipelineError::Internal("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_stage_accessor() {
        assert_eq!(PipelineError::ServiceUnavailable(Stage::Grouping).stage(), Some(Stage::Grouping));
        assert_eq!(PipelineError::Busy("x".into()).stage(), None);
    }
}
