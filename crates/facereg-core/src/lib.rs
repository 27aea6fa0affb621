//! facereg-core — face encoding extraction and matching.
//!
//! The [`Extractor`] turns a decoded image into a single face [`Encoding`]
//! through a [`FaceModel`] collaborator. The shipped model runs SCRFD for
//! detection, a 68-point landmark regressor and ArcFace for the descriptor,
//! all via ONNX Runtime. The [`Registry`] holds enrolled encodings and is
//! searched with a [`Matcher`].

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod landmarks;
pub mod matcher;
pub mod model;
pub mod onnx;
pub mod recognizer;
pub mod registry;
pub mod types;

pub use extractor::{ExtractSettings, Extraction, Extractor};
pub use matcher::{
    arcface_match_threshold, euclidean_threshold_for_cosine, FirstWithinThreshold, MatchOutcome,
    MatchStrategy, Matcher, NearestWithinThreshold, ARCFACE_COSINE_THRESHOLD,
    DEFAULT_MATCH_THRESHOLD,
};
pub use model::{FaceModel, ModelError};
pub use onnx::{ModelPaths, OnnxFaceModel};
pub use registry::{Registry, RegistryEntry};
pub use types::{BoundingBox, Detection, DetectorKind, Encoding, LandmarkMode, LandmarkSet, Point};

use std::path::PathBuf;

/// System-wide model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/var/lib/facereg/models")
}
