//! [`FaceModel`] backed by ONNX Runtime sessions.

use crate::detector::FaceDetector;
use crate::landmarks::{LandmarkError, LandmarkRegressor};
use crate::model::{FaceModel, ModelError};
use crate::recognizer::FaceRecognizer;
use crate::types::{Detection, DetectorKind, Encoding, LandmarkMode, LandmarkSet};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Model file locations.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub accurate_detector: PathBuf,
    pub fast_detector: PathBuf,
    pub landmarks: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            accurate_detector: dir.join("det_10g.onnx"),
            fast_detector: dir.join("det_500m.onnx"),
            landmarks: dir.join("landmark_68.onnx"),
            recognizer: dir.join("w600k_r50.onnx"),
        }
    }
}

/// SCRFD detectors, 68-point regressor and ArcFace, loaded once.
pub struct OnnxFaceModel {
    accurate: FaceDetector,
    fast: Option<FaceDetector>,
    landmarks: LandmarkRegressor,
    recognizer: FaceRecognizer,
}

impl OnnxFaceModel {
    /// Load every model. The fast detector is optional and skipped when its
    /// file is absent.
    pub fn load(paths: &ModelPaths) -> Result<Self, ModelError> {
        let accurate = FaceDetector::load(&paths.accurate_detector)?;

        let fast = if paths.fast_detector.exists() {
            Some(FaceDetector::load(&paths.fast_detector)?)
        } else {
            tracing::warn!(
                path = %paths.fast_detector.display(),
                "fast detector model missing; only the accurate detector is available"
            );
            None
        };

        let landmarks = LandmarkRegressor::load(&paths.landmarks)?;
        let recognizer = FaceRecognizer::load(&paths.recognizer)?;

        Ok(Self {
            accurate,
            fast,
            landmarks,
            recognizer,
        })
    }

    pub fn has_fast_detector(&self) -> bool {
        self.fast.is_some()
    }
}

impl FaceModel for OnnxFaceModel {
    fn detect(
        &mut self,
        image: &RgbImage,
        upsample_count: u32,
        kind: DetectorKind,
    ) -> Result<Vec<Detection>, ModelError> {
        let detector = match kind {
            DetectorKind::Accurate => &mut self.accurate,
            DetectorKind::Fast => self.fast.as_mut().ok_or(ModelError::DetectorNotLoaded(kind))?,
        };
        Ok(detector.detect(image, upsample_count)?)
    }

    fn landmarks(
        &mut self,
        image: &RgbImage,
        face: &Detection,
        mode: LandmarkMode,
    ) -> Result<LandmarkSet, ModelError> {
        match mode {
            LandmarkMode::Small => {
                let points = face.keypoints.ok_or(LandmarkError::NoKeypoints)?;
                Ok(LandmarkSet { points: points.to_vec() })
            }
            LandmarkMode::Large => Ok(self.landmarks.predict(image, &face.bbox)?),
        }
    }

    fn descriptor(
        &mut self,
        image: &RgbImage,
        landmarks: &LandmarkSet,
        jitter_count: u32,
    ) -> Result<Encoding, ModelError> {
        Ok(self.recognizer.encode(image, landmarks, jitter_count)?)
    }
}
