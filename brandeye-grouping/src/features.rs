//! Local colour/texture features and the embedding acquisition strategy

use crate::providers::EmbeddingOutcome;
use brandeye_core::EmbeddingVector;
use image::RgbImage;
use tracing::warn;

/// Sobel magnitude above which a pixel counts as an edge
const EDGE_MAGNITUDE: f32 = 100.0;

/// `[mean R, mean G, mean B, edge density * 255]` for one crop.
///
/// The texture term is scaled like a sum over a binary 0/255 edge map divided by the
/// pixel count, so it lives on the same range as the colour channels.
pub fn color_texture_features(image: &RgbImage) -> EmbeddingVector {
    let (width, height) = image.dimensions();
    let pixels = (width as f64) * (height as f64);
    if pixels == 0.0 {
        return EmbeddingVector::new(vec![0.0; 4]);
    }

    let mut sums = [0f64; 3];
    for p in image.pixels() {
        for (sum, channel) in sums.iter_mut().zip(p.0) {
            *sum += channel as f64;
        }
    }

    let edge_density = edge_count(image) as f64 / pixels;
    EmbeddingVector::new(vec![
        (sums[0] / pixels) as f32,
        (sums[1] / pixels) as f32,
        (sums[2] / pixels) as f32,
        (edge_density * 255.0) as f32,
    ])
}

fn luma(image: &RgbImage, x: u32, y: u32) -> f32 {
    let [r, g, b] = image.get_pixel(x, y).0;
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Interior pixels whose Sobel gradient magnitude exceeds the edge threshold
fn edge_count(image: &RgbImage) -> usize {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return 0;
    }

    let mut count = 0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let l = |dx: i32, dy: i32| luma(image, (x as i32 + dx) as u32, (y as i32 + dy) as u32);
            let gx = (l(1, -1) + 2.0 * l(1, 0) + l(1, 1)) - (l(-1, -1) + 2.0 * l(-1, 0) + l(-1, 1));
            let gy = (l(-1, 1) + 2.0 * l(0, 1) + l(1, 1)) - (l(-1, -1) + 2.0 * l(0, -1) + l(1, -1));
            if (gx * gx + gy * gy).sqrt() > EDGE_MAGNITUDE {
                count += 1;
            }
        }
    }
    count
}

/// Why a batch of collaborator embeddings cannot be used, if it cannot.
pub fn reject_reason(expected: usize, vectors: &[EmbeddingVector]) -> Option<String> {
    if vectors.len() != expected {
        return Some(format!("expected {} embeddings, got {}", expected, vectors.len()));
    }
    let Some(first) = vectors.first() else {
        return None;
    };
    if first.dim() == 0 {
        return Some("embeddings have zero dimension".to_string());
    }
    if vectors.iter().any(|v| v.dim() != first.dim()) {
        return Some("embeddings have inconsistent dimensions".to_string());
    }
    if vectors.iter().any(|v| !v.is_finite()) {
        return Some("embeddings contain non-finite values".to_string());
    }
    None
}

/// Embeddings ready for clustering, one per crop
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEmbeddings {
    pub vectors: Vec<EmbeddingVector>,
    /// Set when the collaborator degraded its answer or local features replaced it
    pub degraded: Option<String>,
}

/// Accepts the collaborator's embeddings when they pass [`reject_reason`], otherwise
/// computes local colour/texture features for the whole batch. Never comes back empty
/// handed, so clustering always has one vector per crop.
pub fn resolve_embeddings(primary: EmbeddingOutcome, crops: &[RgbImage]) -> ResolvedEmbeddings {
    let fallback = |reason: String| {
        warn!("Using local colour/texture features: {}", reason);
        ResolvedEmbeddings {
            vectors: crops.iter().map(color_texture_features).collect(),
            degraded: Some(reason),
        }
    };

    match primary {
        EmbeddingOutcome::Present(vectors) => match reject_reason(crops.len(), &vectors) {
            None => ResolvedEmbeddings { vectors, degraded: None },
            Some(reason) => fallback(reason),
        },
        EmbeddingOutcome::Degraded { vectors, reason } => match reject_reason(crops.len(), &vectors) {
            None => ResolvedEmbeddings { vectors, degraded: Some(reason) },
            Some(rejected) => fallback(rejected),
        },
        EmbeddingOutcome::Absent { reason } => fallback(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_solid_crop_features() {
        let crop = RgbImage::from_pixel(10, 10, Rgb([200, 100, 50]));
        let features = color_texture_features(&crop);
        assert_eq!(features.values(), &[200.0, 100.0, 50.0, 0.0]);
    }

    #[test]
    fn test_edges_raise_texture_score() {
        let mut crop = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        for y in 0..10 {
            for x in 5..10 {
                crop.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let features = color_texture_features(&crop);
        assert!(features.values()[3] > 0.0);
    }

    #[test]
    fn test_reject_reason() {
        let good = vec![EmbeddingVector::new(vec![1.0, 2.0]); 2];
        assert_eq!(reject_reason(2, &good), None);
        assert!(reject_reason(3, &good).is_some());
        assert!(reject_reason(1, &[EmbeddingVector::new(vec![])]).is_some());
        assert!(reject_reason(2, &[EmbeddingVector::new(vec![1.0]), EmbeddingVector::new(vec![1.0, 2.0])]).is_some());
        assert!(reject_reason(1, &[EmbeddingVector::new(vec![f32::INFINITY])]).is_some());
        assert_eq!(reject_reason(0, &[]), None);
    }

    #[test]
    fn test_resolve_accepts_valid_primary() {
        let crops = vec![RgbImage::new(4, 4)];
        let vectors = vec![EmbeddingVector::new(vec![0.5; 8])];
        let resolved = resolve_embeddings(EmbeddingOutcome::Present(vectors.clone()), &crops);
        assert_eq!(resolved, ResolvedEmbeddings { vectors, degraded: None });
    }

    #[test]
    fn test_resolve_keeps_usable_degraded_vectors() {
        let crops = vec![RgbImage::new(4, 4)];
        let vectors = vec![EmbeddingVector::new(vec![0.5; 8])];
        let primary = EmbeddingOutcome::Degraded { vectors: vectors.clone(), reason: "partial batch".into() };
        let resolved = resolve_embeddings(primary, &crops);
        assert_eq!(resolved.vectors, vectors);
        assert_eq!(resolved.degraded.as_deref(), Some("partial batch"));
    }

    #[test]
    fn test_resolve_falls_back_on_count_mismatch() {
        let crops = vec![RgbImage::new(4, 4), RgbImage::new(4, 4)];
        let primary = EmbeddingOutcome::Present(vec![EmbeddingVector::new(vec![0.5; 8])]);
        let resolved = resolve_embeddings(primary, &crops);
        assert_eq!(resolved.vectors.len(), 2);
        assert_eq!(resolved.vectors[0].dim(), 4);
        assert!(resolved.degraded.unwrap().contains("expected 2"));
    }

    #[test]
    fn test_resolve_falls_back_when_absent() {
        let crops = vec![RgbImage::new(4, 4)];
        let resolved = resolve_embeddings(EmbeddingOutcome::absent("not configured"), &crops);
        assert_eq!(resolved.vectors.len(), 1);
        assert_eq!(resolved.degraded.as_deref(), Some("not configured"));
    }
}
