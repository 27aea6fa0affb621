//! Face alignment via 4-DOF similarity transforms.
//!
//! ArcFace expects a 112×112 crop with the five alignment points at the
//! InsightFace reference positions. The same transform type also produces the
//! square crops fed to the landmark regressor.

use crate::types::Point;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform mapping source pixels to output pixels:
///
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    /// Uniform scale about `center`, placing it at the centre of an
    /// `out_size` square.
    pub fn crop(center: Point, scale: f32, out_size: u32) -> Self {
        let half = out_size as f32 / 2.0;
        Self {
            a: scale,
            b: 0.0,
            tx: half - center.x * scale,
            ty: half - center.y * scale,
        }
    }

    /// Least-squares estimate of the transform taking `src` onto `dst`.
    pub fn estimate(src: &[Point; 5], dst: &[Point; 5]) -> Self {
        // Overdetermined system in [a, b, tx, ty]:
        //   sx * a - sy * b + tx = dx
        //   sy * a + sx * b + ty = dy
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for (s, d) in src.iter().zip(dst.iter()) {
            let rows = [([s.x, -s.y, 1.0, 0.0], d.x), ([s.y, s.x, 0.0, 1.0], d.y)];
            for (r, rhs) in rows {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += r[j] * r[k];
                    }
                    atb[j] += r[j] * rhs;
                }
            }
        }

        let [a, b, tx, ty] = solve_4x4(ata, atb);
        Self { a, b, tx, ty }
    }

    /// Compose with a further transform applied after this one.
    pub fn then(&self, next: &SimilarityTransform) -> Self {
        Self {
            a: next.a * self.a - next.b * self.b,
            b: next.b * self.a + next.a * self.b,
            tx: next.a * self.tx - next.b * self.ty + next.tx,
            ty: next.b * self.tx + next.a * self.ty + next.ty,
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x - self.b * p.y + self.tx,
            self.b * p.x + self.a * p.y + self.ty,
        )
    }

    /// Map an output point back into source coordinates.
    pub fn invert(&self, p: Point) -> Option<Point> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let (dx, dy) = (p.x - self.tx, p.y - self.ty);
        Some(Point::new(
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }

    /// Warp `image` into an `out_size` square using bilinear sampling.
    /// Samples outside the source are black.
    pub fn warp(&self, image: &RgbImage, out_size: u32) -> RgbImage {
        let mut output = RgbImage::new(out_size, out_size);
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return output;
        }

        let (w, h) = (image.width() as i64, image.height() as i64);
        let sample = |x: i64, y: i64, c: usize| -> f32 {
            if x >= 0 && x < w && y >= 0 && y < h {
                image.get_pixel(x as u32, y as u32)[c] as f32
            } else {
                0.0
            }
        };

        for (ox, oy, pixel) in output.enumerate_pixels_mut() {
            let Some(src) = self.invert(Point::new(ox as f32, oy as f32)) else {
                continue;
            };
            let x0 = src.x.floor() as i64;
            let y0 = src.y.floor() as i64;
            let fx = src.x - x0 as f32;
            let fy = src.y - y0 as f32;

            let mut rgb = [0u8; 3];
            for (c, out) in rgb.iter_mut().enumerate() {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                *out = val.round().clamp(0.0, 255.0) as u8;
            }
            *pixel = Rgb(rgb);
        }

        output
    }
}

/// Gaussian elimination with partial pivoting on a 4×4 system.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: [[f32; 4]; 4], atb: [f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            // Degenerate landmarks: fall back to identity.
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Reference points as [`Point`]s.
pub fn reference_points() -> [Point; 5] {
    REFERENCE_LANDMARKS_112.map(|(x, y)| Point::new(x, y))
}

/// Transform taking the five alignment points onto the ArcFace reference.
pub fn alignment_transform(landmarks: &[Point; 5]) -> SimilarityTransform {
    SimilarityTransform::estimate(landmarks, &reference_points())
}

/// Align a face to the canonical 112×112 ArcFace crop.
pub fn align_face(image: &RgbImage, landmarks: &[Point; 5]) -> RgbImage {
    alignment_transform(landmarks).warp(image, ALIGNED_SIZE)
}
