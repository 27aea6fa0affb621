use serde::{Deserialize, Serialize};

/// A point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Face rectangle in (top, right, bottom, left) pixel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Clamp to the pixel extent of a `width` × `height` image.
    ///
    /// Top and left are floored at 0; bottom is capped at the height and right
    /// at the width. Detectors regularly report boxes that spill a few pixels
    /// past the frame edge.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            top: self.top.max(0),
            right: self.right.min(width as i32),
            bottom: self.bottom.min(height as i32),
            left: self.left.max(0),
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.left + self.right) as f32 / 2.0,
            (self.top + self.bottom) as f32 / 2.0,
        )
    }
}

/// One face reported by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Five-point keypoints when the detector produces them:
    /// [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub keypoints: Option<[Point; 5]>,
}

/// Which face detector to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorKind {
    /// Lightweight detector, faster and less accurate.
    #[default]
    Fast,
    /// Heavier detector, used for registration and recognition.
    Accurate,
}

/// Which landmark set to compute for a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LandmarkMode {
    /// Five points (eyes, nose, mouth corners).
    #[default]
    Small,
    /// Full 68-point layout.
    Large,
}

impl LandmarkMode {
    pub fn point_count(self) -> usize {
        match self {
            LandmarkMode::Small => 5,
            LandmarkMode::Large => 68,
        }
    }
}

/// Landmarks located within one face, in image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    pub points: Vec<Point>,
}

impl LandmarkSet {
    /// The five points used for alignment, in
    /// [left_eye, right_eye, nose, left_mouth, right_mouth] order.
    ///
    /// A 68-point set is reduced using the iBUG 300-W indexing: eye centres are
    /// the mean of each eye contour, the nose is the tip (30) and the mouth
    /// corners are 48 and 54. Any other size yields `None`.
    pub fn alignment_points(&self) -> Option<[Point; 5]> {
        match self.points.len() {
            5 => Some([
                self.points[0],
                self.points[1],
                self.points[2],
                self.points[3],
                self.points[4],
            ]),
            68 => {
                let mean = |range: std::ops::Range<usize>| {
                    let n = range.len() as f32;
                    let (sx, sy) = self.points[range]
                        .iter()
                        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
                    Point::new(sx / n, sy / n)
                };
                Some([
                    mean(36..42),
                    mean(42..48),
                    self.points[30],
                    self.points[48],
                    self.points[54],
                ])
            }
            _ => None,
        }
    }
}

/// Face encoding: the descriptor vector for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub values: Vec<f32>,
    /// Model version that produced this encoding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Whether two encodings live in the same descriptor space: same,
    /// non-zero dimension and no conflicting model versions.
    pub fn is_comparable(&self, other: &Encoding) -> bool {
        if self.values.is_empty() || self.dim() != other.dim() {
            return false;
        }
        match (&self.model_version, &other.model_version) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Euclidean distance between two encodings. Infinite when they are not
    /// [comparable](Self::is_comparable).
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        if !self.is_comparable(other) {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_distance_across_dimensions_is_infinite() {
        let stored = Encoding::new(vec![0.1; 128]);
        let mut values = vec![0.1; 128];
        values.extend(vec![0.7; 384]);
        let probe = Encoding::new(values);
        assert!(!probe.is_comparable(&stored));
        assert_eq!(probe.euclidean_distance(&stored), f32::INFINITY);
    }

    #[test]
    fn test_empty_encoding_is_not_comparable() {
        let empty = Encoding::new(vec![]);
        let other = Encoding::new(vec![5.0, 5.0]);
        assert_eq!(empty.euclidean_distance(&other), f32::INFINITY);
        assert_eq!(other.euclidean_distance(&empty), f32::INFINITY);
        assert_eq!(empty.euclidean_distance(&empty), f32::INFINITY);
    }

    #[test]
    fn test_model_versions_must_agree() {
        let mut a = Encoding::new(vec![0.0, 1.0]);
        let mut b = Encoding::new(vec![0.0, 1.0]);
        assert!(a.is_comparable(&b));

        a.model_version = Some("w600k_r50".to_string());
        assert!(a.is_comparable(&b));

        b.model_version = Some("other".to_string());
        assert!(!a.is_comparable(&b));
        assert_eq!(a.euclidean_distance(&b), f32::INFINITY);
    }

    #[test]
    fn test_encoding_keeps_model_version_when_stored() {
        let mut enc = Encoding::new(vec![0.25, -0.5]);
        enc.model_version = Some("w600k_r50".to_string());
        let json = serde_json::to_vec(&enc).unwrap();
        assert_eq!(serde_json::from_slice::<Encoding>(&json).unwrap(), enc);
    }

    #[test]
    fn test_clamp_inside_is_noop() {
        let b = BoundingBox::new(10, 90, 80, 5);
        assert_eq!(b.clamp_to(100, 100), b);
    }

    #[test]
    fn test_clamp_overflowing_box() {
        let b = BoundingBox::new(-4, 130, 75, -12);
        let c = b.clamp_to(120, 70);
        assert_eq!(c, BoundingBox::new(0, 120, 70, 0));
    }

    #[test]
    fn test_alignment_points_small() {
        let pts: Vec<Point> = (0..5).map(|i| Point::new(i as f32, 0.0)).collect();
        let set = LandmarkSet { points: pts.clone() };
        let five = set.alignment_points().unwrap();
        assert_eq!(five.to_vec(), pts);
    }

    #[test]
    fn test_alignment_points_large() {
        let mut pts = vec![Point::new(0.0, 0.0); 68];
        for p in &mut pts[36..42] {
            *p = Point::new(10.0, 20.0);
        }
        for p in &mut pts[42..48] {
            *p = Point::new(30.0, 20.0);
        }
        pts[30] = Point::new(20.0, 30.0);
        pts[48] = Point::new(12.0, 40.0);
        pts[54] = Point::new(28.0, 40.0);
        let five = LandmarkSet { points: pts }.alignment_points().unwrap();
        assert_eq!(five[0], Point::new(10.0, 20.0));
        assert_eq!(five[1], Point::new(30.0, 20.0));
        assert_eq!(five[2], Point::new(20.0, 30.0));
        assert_eq!(five[3], Point::new(12.0, 40.0));
        assert_eq!(five[4], Point::new(28.0, 40.0));
    }

    #[test]
    fn test_alignment_points_unknown_layout() {
        let set = LandmarkSet { points: vec![Point::new(0.0, 0.0); 7] };
        assert!(set.alignment_points().is_none());
    }
}
