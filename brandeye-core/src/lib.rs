pub mod types;
pub mod error;
pub mod config;
pub mod protocol;

pub use error::{Error, Result};
pub use types::{
    BBox, Detection, GroupedDetection, OcrToken, EmbeddingVector, Group, GroupSummary,
    group_summary,
};
pub use config::{BrandEyeConfig, ConfigError, DistanceMetric};
