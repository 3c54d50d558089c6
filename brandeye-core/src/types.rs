use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Axis-aligned bounding box in pixel coordinates, serialized as `[x1, y1, x2, y2]`.
///
/// Deserialization does not reject degenerate boxes; callers decide whether to drop
/// or refuse them via [`BBox::is_valid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    /// Checked constructor: requires `x1 < x2` and `y1 < y2`.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> crate::Result<Self> {
        let bbox = Self { x1, y1, x2, y2 };
        if !bbox.is_valid() {
            return Err(crate::Error::InvalidDetection(format!(
                "degenerate bounding box {}",
                bbox
            )));
        }
        Ok(bbox)
    }

    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    pub fn width(&self) -> i64 {
        (self.x2 as i64 - self.x1 as i64).max(0)
    }

    pub fn height(&self) -> i64 {
        (self.y2 as i64 - self.y1 as i64).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    /// Clamp to an image of `width` x `height`. Returns `None` when nothing of the box
    /// remains inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BBox> {
        let w = i32::try_from(width).unwrap_or(i32::MAX);
        let h = i32::try_from(height).unwrap_or(i32::MAX);
        let clamped = BBox {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        };
        clamped.is_valid().then_some(clamped)
    }

    /// Intersection over union, 0.0 when the boxes do not overlap.
    pub fn iou(&self, other: &BBox) -> f64 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }
        let intersection = (ix2 as i64 - ix1 as i64) * (iy2 as i64 - iy1 as i64);
        let union = self.area() + other.area() - intersection;
        if union <= 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }
}

impl From<[i32; 4]> for BBox {
    fn from(v: [i32; 4]) -> Self {
        Self { x1: v[0], y1: v[1], x2: v[2], y2: v[3] }
    }
}

impl From<BBox> for [i32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}

/// A product detection as produced by the detection collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32) -> Self {
        Self { bbox, confidence }
    }

    /// Validate bbox ordering and confidence range
    pub fn validate(&self) -> crate::Result<()> {
        if !self.bbox.is_valid() {
            return Err(crate::Error::InvalidDetection(format!(
                "degenerate bounding box {}",
                self.bbox
            )));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(crate::Error::InvalidDetection(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }

    /// Attach the grouping result. This is the only way a detection gains a group.
    pub fn into_grouped(
        self,
        group_id: usize,
        brand_name: Option<String>,
        group_name: String,
    ) -> GroupedDetection {
        GroupedDetection {
            bbox: self.bbox,
            confidence: self.confidence,
            group_id,
            brand_name,
            group_name,
        }
    }
}

/// A detection after grouping. `brand_name` is omitted on the wire when unmatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedDetection {
    pub bbox: BBox,
    pub confidence: f32,
    pub group_id: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    pub group_name: String,
}

/// Text recognized inside one detection crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
}

impl OcrToken {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox: None,
        }
    }
}

/// Visual appearance of one detection crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(pub Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// One group of the final partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: usize,
    pub name: String,
    /// Canonical brand for brand-matched groups
    pub brand: Option<String>,
    /// Indices into the request's detection list, ascending
    pub members: Vec<usize>,
}

/// Member count per group id, ordered by id.
pub type GroupSummary = BTreeMap<usize, usize>;

pub fn group_summary(detections: &[GroupedDetection]) -> GroupSummary {
    let mut summary = GroupSummary::new();
    for det in detections {
        *summary.entry(det.group_id).or_insert(0) += 1;
    }
    summary
}
