//! The face model collaborator used by the [`Extractor`](crate::Extractor).

use crate::detector::DetectorError;
use crate::landmarks::LandmarkError;
use crate::recognizer::RecognizerError;
use crate::types::{Detection, DetectorKind, Encoding, LandmarkMode, LandmarkSet};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmarks: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0:?} detector not loaded")]
    DetectorNotLoaded(DetectorKind),
}

/// Face detection, landmark localization and descriptor computation.
///
/// Implementations may keep mutable inference state, hence `&mut self`.
pub trait FaceModel {
    /// Locate faces. `upsample_count` enlarges the image before detection so
    /// smaller faces are found.
    fn detect(
        &mut self,
        image: &RgbImage,
        upsample_count: u32,
        kind: DetectorKind,
    ) -> Result<Vec<Detection>, ModelError>;

    /// Locate landmarks within one detected face.
    fn landmarks(
        &mut self,
        image: &RgbImage,
        face: &Detection,
        mode: LandmarkMode,
    ) -> Result<LandmarkSet, ModelError>;

    /// Compute the encoding of the face described by `landmarks`.
    fn descriptor(
        &mut self,
        image: &RgbImage,
        landmarks: &LandmarkSet,
        jitter_count: u32,
    ) -> Result<Encoding, ModelError>;
}
