//! ArcFace face recognizer via ONNX Runtime.
//!
//! Computes L2-normalized face encodings from 112×112 aligned RGB crops using
//! the w600k_r50 ArcFace model.

use crate::alignment::{self, SimilarityTransform, ALIGNED_SIZE};
use crate::types::{Encoding, LandmarkSet};
use image::imageops;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rand::Rng;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0 — ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

// Jitter ranges for resampled encodings.
const JITTER_MAX_SCALE: f32 = 0.05;
const JITTER_MAX_ROTATION_RAD: f32 = 0.05;
const JITTER_MAX_SHIFT_PX: f32 = 3.0;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("landmark set of {0} points cannot be aligned")]
    UnalignableLandmarks(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Compute the encoding of the face described by `landmarks`.
    ///
    /// With `jitter_count` > 1 the face is re-aligned that many times with
    /// small random perturbations and the descriptors are averaged.
    pub fn encode(
        &mut self,
        image: &RgbImage,
        landmarks: &LandmarkSet,
        jitter_count: u32,
    ) -> Result<Encoding, RecognizerError> {
        let points = landmarks
            .alignment_points()
            .ok_or(RecognizerError::UnalignableLandmarks(landmarks.points.len()))?;
        let base = alignment::alignment_transform(&points);

        let runs = jitter_count.max(1);
        let mut rng = rand::thread_rng();
        let mut sum = vec![0.0f32; ARCFACE_EMBEDDING_DIM];

        for run in 0..runs {
            let crop = if run == 0 {
                base.warp(image, ALIGNED_SIZE)
            } else {
                jittered_crop(image, &base, &mut rng)
            };
            let descriptor = self.infer(&crop)?;
            for (acc, v) in sum.iter_mut().zip(descriptor) {
                *acc += v;
            }
        }

        tracing::debug!(runs, "ArcFace encoding computed");

        Ok(Encoding {
            values: l2_normalize(sum),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    fn infer(&mut self, aligned: &RgbImage) -> Result<Vec<f32>, RecognizerError> {
        let input = preprocess(aligned);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(l2_normalize(raw.to_vec()))
    }
}

/// Aligned crop with random scale, rotation, shift, and a coin-flip mirror.
fn jittered_crop(image: &RgbImage, base: &SimilarityTransform, rng: &mut impl Rng) -> RgbImage {
    let scale = 1.0 + rng.gen_range(-JITTER_MAX_SCALE..=JITTER_MAX_SCALE);
    let angle = rng.gen_range(-JITTER_MAX_ROTATION_RAD..=JITTER_MAX_ROTATION_RAD);
    let centre = ALIGNED_SIZE as f32 / 2.0;

    // Rotate and scale about the crop centre, then shift.
    let (a, b) = (scale * angle.cos(), scale * angle.sin());
    let perturb = SimilarityTransform {
        a,
        b,
        tx: centre - (a * centre - b * centre) + rng.gen_range(-JITTER_MAX_SHIFT_PX..=JITTER_MAX_SHIFT_PX),
        ty: centre - (b * centre + a * centre) + rng.gen_range(-JITTER_MAX_SHIFT_PX..=JITTER_MAX_SHIFT_PX),
    };

    let mut crop = base.then(&perturb).warp(image, ALIGNED_SIZE);
    if rng.gen_bool(0.5) {
        imageops::flip_horizontal_in_place(&mut crop);
    }
    crop
}

fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.into_iter().map(|x| x / norm).collect()
    } else {
        values
    }
}

/// Convert a 112×112 RGB crop into a normalized NCHW tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}
