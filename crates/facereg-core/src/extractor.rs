//! Embedding extraction: image in, first face's encoding out.

use crate::model::{FaceModel, ModelError};
use crate::types::{BoundingBox, Detection, DetectorKind, Encoding, LandmarkMode};
use image::RgbImage;

/// Result of extracting an encoding from an image.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Face(Encoding),
    NoFaceFound,
}

/// Parameters for [`Extractor::extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSettings {
    pub upsample_count: u32,
    pub detector: DetectorKind,
    pub landmarks: LandmarkMode,
    pub jitter_count: u32,
}

impl Default for ExtractSettings {
    /// Accurate detector, no upsampling, 68-point landmarks, one jitter.
    fn default() -> Self {
        Self {
            upsample_count: 0,
            detector: DetectorKind::Accurate,
            landmarks: LandmarkMode::Large,
            jitter_count: 1,
        }
    }
}

/// Runs detection, clamping, landmarks and descriptor on top of a [`FaceModel`].
pub struct Extractor<M> {
    model: M,
    settings: ExtractSettings,
}

impl<M: FaceModel> Extractor<M> {
    pub fn new(model: M, settings: ExtractSettings) -> Self {
        Self { model, settings }
    }

    pub fn settings(&self) -> &ExtractSettings {
        &self.settings
    }

    /// Encoding of the first detected face, or [`Extraction::NoFaceFound`].
    ///
    /// Faces after the first (in detector order) are ignored.
    pub fn extract(&mut self, image: &RgbImage) -> Result<Extraction, ModelError> {
        let ExtractSettings {
            upsample_count,
            detector,
            landmarks,
            jitter_count,
        } = self.settings;

        let mut faces = self.detect_clamped(image, upsample_count, detector)?;
        tracing::debug!(faces = faces.len(), "extract: faces detected");

        if faces.is_empty() {
            return Ok(Extraction::NoFaceFound);
        }
        let face = faces.swap_remove(0);

        let encoding = self.encode(image, &face, landmarks, jitter_count)?;
        Ok(Extraction::Face(encoding))
    }

    /// Clamped bounding boxes of every detected face.
    pub fn face_locations(
        &mut self,
        image: &RgbImage,
        upsample_count: u32,
        kind: DetectorKind,
    ) -> Result<Vec<BoundingBox>, ModelError> {
        Ok(self
            .detect_clamped(image, upsample_count, kind)?
            .into_iter()
            .map(|d| d.bbox)
            .collect())
    }

    /// One encoding per detected face, in detector order.
    pub fn encodings(
        &mut self,
        image: &RgbImage,
        upsample_count: u32,
        kind: DetectorKind,
        mode: LandmarkMode,
        jitter_count: u32,
    ) -> Result<Vec<Encoding>, ModelError> {
        let faces = self.detect_clamped(image, upsample_count, kind)?;
        faces
            .iter()
            .map(|face| self.encode(image, face, mode, jitter_count))
            .collect()
    }

    fn detect_clamped(
        &mut self,
        image: &RgbImage,
        upsample_count: u32,
        kind: DetectorKind,
    ) -> Result<Vec<Detection>, ModelError> {
        let (width, height) = image.dimensions();
        let mut faces = self.model.detect(image, upsample_count, kind)?;
        for face in &mut faces {
            face.bbox = face.bbox.clamp_to(width, height);
        }
        Ok(faces)
    }

    fn encode(
        &mut self,
        image: &RgbImage,
        face: &Detection,
        mode: LandmarkMode,
        jitter_count: u32,
    ) -> Result<Encoding, ModelError> {
        let landmarks = self.model.landmarks(image, face, mode)?;
        self.model.descriptor(image, &landmarks, jitter_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LandmarkSet, Point};

    /// Reports a fixed list of detections and encodes each face as its
    /// (top, left) corner, so tests can tell which face was encoded.
    #[derive(Default)]
    struct ScriptedModel {
        detections: Vec<Detection>,
        seen_kind: Option<DetectorKind>,
        seen_mode: Option<LandmarkMode>,
        seen_boxes: Vec<BoundingBox>,
    }

    impl ScriptedModel {
        fn with_boxes(boxes: &[BoundingBox]) -> Self {
            Self {
                detections: boxes
                    .iter()
                    .map(|&bbox| Detection { bbox, confidence: 0.9, keypoints: None })
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl FaceModel for ScriptedModel {
        fn detect(
            &mut self,
            _image: &RgbImage,
            _upsample_count: u32,
            kind: DetectorKind,
        ) -> Result<Vec<Detection>, ModelError> {
            self.seen_kind = Some(kind);
            Ok(self.detections.clone())
        }

        fn landmarks(
            &mut self,
            _image: &RgbImage,
            face: &Detection,
            mode: LandmarkMode,
        ) -> Result<LandmarkSet, ModelError> {
            self.seen_mode = Some(mode);
            self.seen_boxes.push(face.bbox);
            let corner = Point::new(face.bbox.left as f32, face.bbox.top as f32);
            Ok(LandmarkSet { points: vec![corner; mode.point_count()] })
        }

        fn descriptor(
            &mut self,
            _image: &RgbImage,
            landmarks: &LandmarkSet,
            _jitter_count: u32,
        ) -> Result<Encoding, ModelError> {
            let p = landmarks.points[0];
            Ok(Encoding::new(vec![p.y, p.x]))
        }
    }

    fn image() -> RgbImage {
        RgbImage::new(100, 80)
    }

    #[test]
    fn test_no_face_found() {
        let mut extractor = Extractor::new(ScriptedModel::default(), ExtractSettings::default());
        assert_eq!(extractor.extract(&image()).unwrap(), Extraction::NoFaceFound);
    }

    #[test]
    fn test_first_face_only() {
        let model = ScriptedModel::with_boxes(&[
            BoundingBox::new(10, 40, 40, 12),
            BoundingBox::new(20, 90, 60, 55),
        ]);
        let mut extractor = Extractor::new(model, ExtractSettings::default());
        let result = extractor.extract(&image()).unwrap();
        assert_eq!(result, Extraction::Face(Encoding::new(vec![10.0, 12.0])));
        assert_eq!(extractor.model.seen_boxes.len(), 1);
    }

    #[test]
    fn test_extract_uses_accurate_detector_and_large_landmarks() {
        let model = ScriptedModel::with_boxes(&[BoundingBox::new(1, 2, 3, 0)]);
        let mut extractor = Extractor::new(model, ExtractSettings::default());
        extractor.extract(&image()).unwrap();
        assert_eq!(extractor.model.seen_kind, Some(DetectorKind::Accurate));
        assert_eq!(extractor.model.seen_mode, Some(LandmarkMode::Large));
    }

    #[test]
    fn test_boxes_are_clamped_before_landmarks() {
        let model = ScriptedModel::with_boxes(&[BoundingBox::new(-5, 120, 95, -3)]);
        let mut extractor = Extractor::new(model, ExtractSettings::default());
        let result = extractor.extract(&image()).unwrap();
        assert_eq!(extractor.model.seen_boxes, vec![BoundingBox::new(0, 100, 80, 0)]);
        assert_eq!(result, Extraction::Face(Encoding::new(vec![0.0, 0.0])));
    }

    #[test]
    fn test_face_locations_and_encodings_cover_all_faces() {
        let boxes = [BoundingBox::new(10, 40, 40, 12), BoundingBox::new(20, 130, 60, 55)];
        let mut extractor =
            Extractor::new(ScriptedModel::with_boxes(&boxes), ExtractSettings::default());

        let locations = extractor
            .face_locations(&image(), 0, DetectorKind::Fast)
            .unwrap();
        assert_eq!(locations, vec![boxes[0], BoundingBox::new(20, 100, 60, 55)]);
        assert_eq!(extractor.model.seen_kind, Some(DetectorKind::Fast));

        let encodings = extractor
            .encodings(&image(), 0, DetectorKind::Fast, LandmarkMode::Small, 1)
            .unwrap();
        assert_eq!(encodings.len(), 2);
        assert_eq!(encodings[1].values, vec![20.0, 55.0]);
        assert_eq!(extractor.model.seen_mode, Some(LandmarkMode::Small));
    }
}
