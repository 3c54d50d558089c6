//! Density-based clustering (DBSCAN) of appearance embeddings

use crate::error::GroupingError;
use brandeye_core::{DistanceMetric, EmbeddingVector};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterLabel {
    Cluster(usize),
    Noise,
}

#[derive(Debug, Clone)]
pub struct EmbeddingClusterer {
    eps: f64,
    min_points: usize,
    metric: DistanceMetric,
    standardize: bool,
}

impl EmbeddingClusterer {
    pub fn new(eps: f64, min_points: usize, metric: DistanceMetric) -> Result<Self, GroupingError> {
        if !(eps.is_finite() && eps > 0.0) {
            return Err(GroupingError::InvalidInput(format!("eps must be positive, got {}", eps)));
        }
        if min_points == 0 {
            return Err(GroupingError::InvalidInput("min_points must be at least 1".to_string()));
        }
        Ok(Self {
            eps,
            min_points,
            metric,
            standardize: false,
        })
    }

    /// Standardize each dimension to zero mean and unit variance before clustering
    pub fn with_standardization(mut self, standardize: bool) -> Self {
        self.standardize = standardize;
        self
    }

    /// One label per input vector. Cluster ids follow the scan order of their seeds.
    pub fn labels(&self, vectors: &[EmbeddingVector]) -> Result<Vec<ClusterLabel>, GroupingError> {
        Ok(self.fit(vectors)?.0)
    }

    /// Groups of input indices in discovery order: a cluster is placed at its seed's
    /// index, a noise point becomes a singleton at its own index. Members ascend.
    pub fn partition(&self, vectors: &[EmbeddingVector]) -> Result<Vec<Vec<usize>>, GroupingError> {
        let (labels, seeds) = self.fit(vectors)?;

        let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); seeds.len()];
        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for (idx, label) in labels.iter().enumerate() {
            match label {
                ClusterLabel::Cluster(c) => clusters[*c].push(idx),
                ClusterLabel::Noise => groups.push((idx, vec![idx])),
            }
        }
        groups.extend(seeds.into_iter().zip(clusters));
        groups.sort_by_key(|(discovery, _)| *discovery);

        Ok(groups.into_iter().map(|(_, members)| members).collect())
    }

    fn fit(&self, vectors: &[EmbeddingVector]) -> Result<(Vec<ClusterLabel>, Vec<usize>), GroupingError> {
        let points = self.prepare(vectors)?;
        let n = points.len();

        let mut labels: Vec<Option<ClusterLabel>> = vec![None; n];
        let mut seeds = Vec::new();

        for i in 0..n {
            if labels[i].is_some() {
                continue;
            }
            let neighbours = self.region(&points, i);
            if neighbours.len() < self.min_points {
                labels[i] = Some(ClusterLabel::Noise);
                continue;
            }

            let cluster = seeds.len();
            seeds.push(i);
            labels[i] = Some(ClusterLabel::Cluster(cluster));

            let mut queue: VecDeque<usize> = neighbours.into();
            while let Some(j) = queue.pop_front() {
                match labels[j] {
                    Some(ClusterLabel::Cluster(_)) => continue,
                    // border point: joins but does not expand
                    Some(ClusterLabel::Noise) => {
                        labels[j] = Some(ClusterLabel::Cluster(cluster));
                        continue;
                    }
                    None => labels[j] = Some(ClusterLabel::Cluster(cluster)),
                }
                let expansion = self.region(&points, j);
                if expansion.len() >= self.min_points {
                    queue.extend(expansion);
                }
            }
        }

        let labels = labels
            .into_iter()
            .map(|l| l.unwrap_or(ClusterLabel::Noise))
            .collect();
        Ok((labels, seeds))
    }

    /// Indices within eps of `idx`, itself included
    fn region(&self, points: &[Vec<f64>], idx: usize) -> Vec<usize> {
        points
            .iter()
            .enumerate()
            .filter(|(_, p)| self.distance(&points[idx], p) <= self.eps)
            .map(|(j, _)| j)
            .collect()
    }

    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self.metric {
            DistanceMetric::Euclidean => euclidean_distance(a, b),
            DistanceMetric::Cosine => cosine_distance(a, b),
        }
    }

    fn prepare(&self, vectors: &[EmbeddingVector]) -> Result<Vec<Vec<f64>>, GroupingError> {
        let Some(first) = vectors.first() else {
            return Ok(Vec::new());
        };
        let dim = first.dim();
        if dim == 0 {
            return Err(GroupingError::InvalidInput("embedding dimension is zero".to_string()));
        }
        for (idx, v) in vectors.iter().enumerate() {
            if v.dim() != dim {
                return Err(GroupingError::InvalidInput(format!(
                    "embedding {} has dimension {}, expected {}",
                    idx,
                    v.dim(),
                    dim
                )));
            }
            if !v.is_finite() {
                return Err(GroupingError::InvalidInput(format!(
                    "embedding {} contains non-finite values",
                    idx
                )));
            }
        }

        let mut points: Vec<Vec<f64>> = vectors
            .iter()
            .map(|v| v.values().iter().map(|x| *x as f64).collect())
            .collect();
        if self.standardize {
            standardize(&mut points, dim);
        }
        Ok(points)
    }
}

/// Per-dimension zero mean, unit (population) variance. Constant dimensions are only centred.
fn standardize(points: &mut [Vec<f64>], dim: usize) {
    let n = points.len() as f64;
    for d in 0..dim {
        let mean = points.iter().map(|p| p[d]).sum::<f64>() / n;
        let variance = points.iter().map(|p| (p[d] - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        for p in points.iter_mut() {
            p[d] -= mean;
            if std > f64::EPSILON {
                p[d] /= std;
            }
        }
    }
}

pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// `1 - cos(a, b)`; a zero vector is at distance 1 from everything else
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return if a == b { 0.0 } else { 1.0 };
    }
    (1.0 - dot / (norm_a * norm_b)).max(0.0)
}
