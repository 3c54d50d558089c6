//! brandeye-grouping: brand and appearance grouping of shelf detections
//!
//! Resolves OCR text against a brand catalogue, clusters the remaining detections
//! by appearance, and merges both into one numbered partition. Served over HTTP by
//! the `brandeye-grouping` binary.

pub mod text;
pub mod brand_db;
pub mod matcher;
pub mod clusterer;
pub mod assembler;
pub mod providers;
pub mod features;
pub mod image_ops;
pub mod inference_pool;
pub mod engine;
pub mod service;
pub mod error;

pub use brand_db::{BrandDatabase, BrandEntry};
pub use matcher::{BrandMatcher, MatchOutcome};
pub use clusterer::{ClusterLabel, EmbeddingClusterer};
pub use assembler::{Assembly, GroupAssembler};
pub use providers::{EmbeddingOutcome, OcrOutcome};
pub use engine::GroupingEngine;
pub use service::create_router;
pub use error::GroupingError;
