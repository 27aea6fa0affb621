//! 68-point facial landmark regressor via ONNX Runtime.
//!
//! The model takes a 192×192 RGB crop centred on the face box, 1.5× the box's
//! longer side, and regresses 68 (x, y) pairs normalized to [-1, 1] over the
//! crop.

use crate::alignment::SimilarityTransform;
use crate::types::{BoundingBox, LandmarkSet, Point};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: u32 = 192;
const LANDMARK_CROP_FACTOR: f32 = 1.5;
const LANDMARK_MEAN: f32 = 0.0;
const LANDMARK_STD: f32 = 1.0;
const LANDMARK_POINTS: usize = 68;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box is empty: {0:?}")]
    EmptyBox(BoundingBox),
    #[error("detector returned no keypoints for five-point landmarks")]
    NoKeypoints,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// 68-point landmark regressor.
pub struct LandmarkRegressor {
    session: Session,
}

impl LandmarkRegressor {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded landmark model"
        );

        Ok(Self { session })
    }

    /// Locate the 68 landmarks of the face in `bbox`.
    pub fn predict(&mut self, image: &RgbImage, bbox: &BoundingBox) -> Result<LandmarkSet, LandmarkError> {
        let transform = crop_transform(bbox)?;
        let crop = transform.warp(image, LANDMARK_INPUT_SIZE);
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark extraction: {e}")))?;

        decode(raw, &transform)
    }
}

/// Crop transform for `bbox`: centred, scaled so 1.5× the longer side fills
/// the model input.
fn crop_transform(bbox: &BoundingBox) -> Result<SimilarityTransform, LandmarkError> {
    let side = bbox.width().max(bbox.height());
    if side <= 0 {
        return Err(LandmarkError::EmptyBox(*bbox));
    }
    let scale = LANDMARK_INPUT_SIZE as f32 / (side as f32 * LANDMARK_CROP_FACTOR);
    Ok(SimilarityTransform::crop(bbox.center(), scale, LANDMARK_INPUT_SIZE))
}

fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - LANDMARK_MEAN) / LANDMARK_STD;
        }
    }
    tensor
}

/// Map normalized crop coordinates back into the image.
fn decode(raw: &[f32], transform: &SimilarityTransform) -> Result<LandmarkSet, LandmarkError> {
    if raw.len() < LANDMARK_POINTS * 2 {
        return Err(LandmarkError::InferenceFailed(format!(
            "expected {} landmark values, got {}",
            LANDMARK_POINTS * 2,
            raw.len()
        )));
    }

    let half = LANDMARK_INPUT_SIZE as f32 / 2.0;
    let points = raw[..LANDMARK_POINTS * 2]
        .chunks_exact(2)
        .map(|xy| {
            let in_crop = Point::new((xy[0] + 1.0) * half, (xy[1] + 1.0) * half);
            transform.invert(in_crop).unwrap_or(in_crop)
        })
        .collect();

    Ok(LandmarkSet { points })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_transform_rejects_empty_box() {
        let err = crop_transform(&BoundingBox::new(10, 10, 10, 10)).unwrap_err();
        assert!(matches!(err, LandmarkError::EmptyBox(_)));
    }

    #[test]
    fn test_decode_maps_back_to_image() {
        // A 128-px face box centred at (100, 100): crop covers 192 px, scale 1.
        let bbox = BoundingBox::new(36, 164, 164, 36);
        let transform = crop_transform(&bbox).unwrap();
        assert!((transform.a - 1.0).abs() < 1e-6);

        let mut raw = vec![0.0f32; LANDMARK_POINTS * 2];
        raw[2] = -1.0; // point 1 at the crop's left edge
        raw[3] = 1.0; // ... and bottom edge
        let set = decode(&raw, &transform).unwrap();

        assert_eq!(set.points.len(), 68);
        let centre = set.points[0];
        assert!((centre.x - 100.0).abs() < 1e-3 && (centre.y - 100.0).abs() < 1e-3);
        let corner = set.points[1];
        assert!((corner.x - 4.0).abs() < 1e-3 && (corner.y - 196.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rejects_short_output() {
        let transform = crop_transform(&BoundingBox::new(0, 10, 10, 0)).unwrap();
        assert!(decode(&[0.0; 10], &transform).is_err());
    }

    #[test]
    fn test_preprocess_shape() {
        let crop = RgbImage::new(LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE);
        let tensor = preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 192, 192]);
    }
}
