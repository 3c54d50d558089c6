//! Grouping engine: image + detections in, grouped detections out

use crate::assembler::{unmatched_indices, Assembly, GroupAssembler};
use crate::brand_db::BrandDatabase;
use crate::clusterer::EmbeddingClusterer;
use crate::error::GroupingError;
use crate::features::resolve_embeddings;
use crate::image_ops::{crop, decode_rgb, encode_png};
use crate::inference_pool::InferencePool;
use crate::matcher::BrandMatcher;
use crate::providers::{
    EmbeddingOutcome, EmbeddingProvider, HttpEmbeddingClient, HttpOcrClient, OcrOutcome, OcrProvider,
    UnavailableEmbedding, UnavailableOcr,
};
use brandeye_core::protocol::{decode_image, GroupRequest};
use brandeye_core::{BrandEyeConfig, Detection};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct GroupingEngine {
    matcher: BrandMatcher,
    assembler: GroupAssembler,
    ocr: Arc<dyn OcrProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    pool: InferencePool,
    max_image_bytes: usize,
    max_detections: usize,
}

impl GroupingEngine {
    pub fn new(
        matcher: BrandMatcher,
        assembler: GroupAssembler,
        ocr: Arc<dyn OcrProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        pool: InferencePool,
    ) -> Self {
        Self {
            matcher,
            assembler,
            ocr,
            embedder,
            pool,
            max_image_bytes: 20 * 1024 * 1024,
            max_detections: 500,
        }
    }

    pub fn with_limits(mut self, max_image_bytes: usize, max_detections: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self.max_detections = max_detections;
        self
    }

    /// Wire up matcher, clusterer and collaborator clients from configuration
    pub fn from_config(config: &BrandEyeConfig, db: Arc<BrandDatabase>) -> Result<Self, GroupingError> {
        let grouping = &config.grouping;
        let timeouts = &config.timeouts;

        let matcher = BrandMatcher::new(db, grouping.match_threshold)?
            .with_min_token_confidence(grouping.min_token_confidence);
        let clusterer = EmbeddingClusterer::new(grouping.cluster_eps, grouping.cluster_min_points, grouping.distance_metric)?
            .with_standardization(grouping.standardize_embeddings);

        let ocr: Arc<dyn OcrProvider> = match &config.services.ocr_url {
            Some(url) => Arc::new(HttpOcrClient::new(url, timeouts.connect(), timeouts.ocr())?),
            None => Arc::new(UnavailableOcr),
        };
        let embedder: Arc<dyn EmbeddingProvider> = match &config.services.embedding_url {
            Some(url) => Arc::new(HttpEmbeddingClient::new(url, timeouts.connect(), timeouts.embedding())?),
            None => Arc::new(UnavailableEmbedding),
        };

        let pool = InferencePool::new(grouping.inference_concurrency, grouping.inference_acquire_timeout());

        Ok(Self::new(matcher, GroupAssembler::new(clusterer), ocr, embedder, pool)
            .with_limits(config.artifacts.max_image_bytes, grouping.max_detections))
    }

    pub fn brand_count(&self) -> usize {
        self.matcher.database().len()
    }

    pub fn ocr_available(&self) -> bool {
        self.ocr.is_available()
    }

    pub fn embedding_available(&self) -> bool {
        self.embedder.is_available()
    }

    pub fn max_image_bytes(&self) -> usize {
        self.max_image_bytes
    }

    /// Decode the wire payload and group it
    pub async fn group_request(&self, request: GroupRequest) -> Result<Assembly, GroupingError> {
        let bytes = decode_image(&request.image, self.max_image_bytes)?;
        self.group(&bytes, request.detections).await
    }

    pub async fn group(&self, image: &[u8], detections: Vec<Detection>) -> Result<Assembly, GroupingError> {
        let started = Instant::now();
        if detections.len() > self.max_detections {
            return Err(GroupingError::InvalidInput(format!(
                "{} detections exceed the limit of {}",
                detections.len(),
                self.max_detections
            )));
        }
        for detection in &detections {
            detection.validate()?;
        }

        let image = decode_rgb(image)?;
        if detections.is_empty() {
            debug!("No detections to group");
            return Ok(Assembly::empty());
        }

        let crops: Vec<RgbImage> = detections.iter().map(|d| crop(&image, &d.bbox)).collect();

        let mut matches = Vec::with_capacity(crops.len());
        for crop in &crops {
            let outcome = self.recognize(crop).await?;
            matches.push(self.matcher.match_outcome(&outcome));
        }

        let unmatched = unmatched_indices(&matches);
        let unmatched_crops: Vec<RgbImage> = unmatched.iter().map(|&i| crops[i].clone()).collect();
        let embeddings = if unmatched_crops.is_empty() {
            Vec::new()
        } else {
            let primary = self.embed(&unmatched_crops).await?;
            let resolved = resolve_embeddings(primary, &unmatched_crops);
            if let Some(reason) = &resolved.degraded {
                debug!("Clustering on degraded embeddings ({})", reason);
            }
            resolved.vectors
        };

        let brand_matches = matches.iter().filter(|m| m.is_matched()).count();
        let assembly = self.assembler.assemble(detections, &matches, &embeddings)?;

        info!(
            "Grouped {} detections into {} groups ({} brand-matched, {} clustered) in {:?}",
            assembly.detections.len(),
            assembly.groups.len(),
            brand_matches,
            unmatched.len(),
            started.elapsed()
        );
        Ok(assembly)
    }

    async fn recognize(&self, crop: &RgbImage) -> Result<OcrOutcome, GroupingError> {
        if !self.ocr.is_available() {
            return Ok(OcrOutcome::absent("ocr not configured"));
        }
        let png = encode_png(crop)?;
        let _slot = match self.pool.acquire().await {
            Ok(slot) => slot,
            Err(e) => {
                warn!("Skipping OCR for crop: {}", e);
                return Ok(OcrOutcome::absent(e.to_string()));
            }
        };
        Ok(self.ocr.recognize(&png).await)
    }

    async fn embed(&self, crops: &[RgbImage]) -> Result<EmbeddingOutcome, GroupingError> {
        if !self.embedder.is_available() {
            return Ok(EmbeddingOutcome::absent("embedding service not configured"));
        }
        let pngs = crops.iter().map(encode_png).collect::<Result<Vec<_>, _>>()?;
        let _slot = match self.pool.acquire().await {
            Ok(slot) => slot,
            Err(e) => {
                warn!("Skipping embedding service: {}", e);
                return Ok(EmbeddingOutcome::absent(e.to_string()));
            }
        };
        Ok(self.embedder.embed(&pngs).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brand_db::BrandEntry;
    use crate::image_ops::test_support::solid_png;
    use async_trait::async_trait;
    use brandeye_core::{BBox, DistanceMetric, EmbeddingVector, OcrToken};
    use std::time::Duration;

    /// OCR that reads a fixed text per call, in order
    struct ScriptedOcr {
        texts: parking_lot::Mutex<std::collections::VecDeque<&'static str>>,
    }

    impl ScriptedOcr {
        fn new(texts: &[&'static str]) -> Self {
            Self {
                texts: parking_lot::Mutex::new(texts.iter().copied().collect()),
            }
        }
    }

    #[async_trait]
    impl OcrProvider for ScriptedOcr {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn recognize(&self, _crop: &[u8]) -> OcrOutcome {
            match self.texts.lock().pop_front() {
                Some("") | None => OcrOutcome::Present(Vec::new()),
                Some(text) => OcrOutcome::Present(vec![OcrToken::new(text, 0.9)]),
            }
        }
    }

    struct FixedEmbedding(Vec<Vec<f32>>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedding {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn embed(&self, _crops: &[Vec<u8>]) -> EmbeddingOutcome {
            EmbeddingOutcome::Present(self.0.iter().cloned().map(EmbeddingVector::from).collect())
        }
    }

    fn engine(ocr: Arc<dyn OcrProvider>, embedder: Arc<dyn EmbeddingProvider>) -> GroupingEngine {
        engine_with_pool(ocr, embedder, InferencePool::new(2, Duration::from_millis(200)))
    }

    fn engine_with_pool(
        ocr: Arc<dyn OcrProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        pool: InferencePool,
    ) -> GroupingEngine {
        let db = Arc::new(
            BrandDatabase::new(vec![
                BrandEntry::new("Kotex", ["kotex"], "feminine_care"),
                BrandEntry::new("Molto", ["molto"], "laundry"),
            ])
            .unwrap(),
        );
        let matcher = BrandMatcher::new(db, 0.6).unwrap();
        let clusterer = EmbeddingClusterer::new(0.5, 2, DistanceMetric::Euclidean).unwrap();
        GroupingEngine::new(
            matcher,
            GroupAssembler::new(clusterer),
            ocr,
            embedder,
            pool,
        )
    }

    fn three_detections() -> Vec<Detection> {
        (0..3)
            .map(|i| Detection::new(BBox::new(i * 10, 0, i * 10 + 8, 8).unwrap(), 0.9))
            .collect()
    }

    #[tokio::test]
    async fn test_kotex_molto_scenario() {
        let engine = engine(
            Arc::new(ScriptedOcr::new(&["Kotex Soft", "", "Molto"])),
            Arc::new(FixedEmbedding(vec![vec![0.3, 0.7]])),
        );
        let png = solid_png(40, 10, [120, 120, 120]);
        let assembly = engine.group(&png, three_detections()).await.unwrap();

        let groups: Vec<(usize, &str, Vec<usize>)> = assembly
            .groups
            .iter()
            .map(|g| (g.id, g.name.as_str(), g.members.clone()))
            .collect();
        assert_eq!(
            groups,
            vec![(0, "Kotex", vec![0]), (1, "Molto", vec![2]), (2, "Group 2", vec![1])]
        );
    }

    #[tokio::test]
    async fn test_without_collaborators_everything_clusters_locally() {
        let engine = engine(Arc::new(UnavailableOcr), Arc::new(UnavailableEmbedding));
        let png = solid_png(40, 10, [10, 200, 10]);
        let assembly = engine.group(&png, three_detections()).await.unwrap();

        // identical solid crops collapse into one appearance cluster
        assert_eq!(assembly.groups.len(), 1);
        assert_eq!(assembly.groups[0].members, vec![0, 1, 2]);
        assert!(assembly.detections.iter().all(|d| d.brand_name.is_none()));
    }

    #[tokio::test]
    async fn test_bad_embeddings_use_fallback() {
        // two vectors for three unmatched crops fails the acceptance check
        let engine = engine(
            Arc::new(UnavailableOcr),
            Arc::new(FixedEmbedding(vec![vec![0.0], vec![5.0]])),
        );
        let png = solid_png(40, 10, [0, 0, 0]);
        let assembly = engine.group(&png, three_detections()).await.unwrap();
        assert_eq!(assembly.detections.len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_pool_degrades_instead_of_failing() {
        let pool = InferencePool::new(1, Duration::from_millis(20));
        let _held = pool.acquire().await.unwrap();
        let engine = engine_with_pool(
            Arc::new(ScriptedOcr::new(&["Kotex", "Kotex", "Kotex"])),
            Arc::new(FixedEmbedding(vec![vec![0.0], vec![9.0], vec![18.0]])),
            pool.clone(),
        );
        let png = solid_png(40, 10, [10, 200, 10]);
        let assembly = engine.group(&png, three_detections()).await.unwrap();

        // no OCR slot: nothing brand-matched; no embedding slot: local features of identical crops
        assert_eq!(assembly.groups.len(), 1);
        assert_eq!(assembly.groups[0].members, vec![0, 1, 2]);
        assert!(assembly.detections.iter().all(|d| d.brand_name.is_none()));
    }

    #[tokio::test]
    async fn test_empty_detections() {
        let engine = engine(Arc::new(UnavailableOcr), Arc::new(UnavailableEmbedding));
        let png = solid_png(4, 4, [0, 0, 0]);
        let assembly = engine.group(&png, Vec::new()).await.unwrap();
        assert!(assembly.groups.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_image_rejected() {
        let engine = engine(Arc::new(UnavailableOcr), Arc::new(UnavailableEmbedding));
        let err = engine.group(b"garbage", three_detections()).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_invalid_detection_rejected() {
        let engine = engine(Arc::new(UnavailableOcr), Arc::new(UnavailableEmbedding));
        let png = solid_png(4, 4, [0, 0, 0]);
        let bad = vec![Detection::new(BBox { x1: 5, y1: 0, x2: 1, y2: 4 }, 0.5)];
        let err = engine.group(&png, bad).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_too_many_detections() {
        let engine = engine(Arc::new(UnavailableOcr), Arc::new(UnavailableEmbedding)).with_limits(1024, 2);
        let png = solid_png(4, 4, [0, 0, 0]);
        let err = engine.group(&png, three_detections()).await.unwrap_err();
        assert!(matches!(err, GroupingError::InvalidInput(_)));
    }
}
