//! facematch-vision: ONNX Runtime face engine.
//!
//! SCRFD detection with five landmarks feeds ArcFace descriptors. An
//! optional FER+ model labels expressions.

pub mod alignment;
pub mod detector;
pub mod expression;
pub mod recognizer;
pub mod render;

use detector::{DetectorError, FaceDetector};
use expression::{ExpressionClassifier, ExpressionError};
use facematch_core::{DetectedFace, EngineError, FaceEngine, FaceExpression};
use image::DynamicImage;
use recognizer::{FaceRecognizer, RecognizerError};
use std::path::{Path, PathBuf};

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
pub const EXPRESSION_MODEL_FILE: &str = "emotion-ferplus-8.onnx";

/// Model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

impl From<DetectorError> for EngineError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::ModelNotFound(path) => EngineError::ModelNotFound(path),
            other => EngineError::InferenceFailed(format!("detector: {other}")),
        }
    }
}

impl From<RecognizerError> for EngineError {
    fn from(e: RecognizerError) -> Self {
        match e {
            RecognizerError::ModelNotFound(path) => EngineError::ModelNotFound(path),
            other => EngineError::InferenceFailed(format!("recognizer: {other}")),
        }
    }
}

impl From<ExpressionError> for EngineError {
    fn from(e: ExpressionError) -> Self {
        match e {
            ExpressionError::ModelNotFound(path) => EngineError::ModelNotFound(path),
            other => EngineError::InferenceFailed(format!("expression: {other}")),
        }
    }
}

/// [`FaceEngine`] backed by ONNX Runtime sessions.
///
/// Descriptors have length [`recognizer::DESCRIPTOR_NORM`], so distances
/// fall in `[0, 1]` and the default match threshold of 0.5 corresponds to a
/// cosine similarity of 0.5.
pub struct OnnxEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    expressions: Option<ExpressionClassifier>,
}

impl OnnxEngine {
    /// Load the detector and recognizer from `model_dir`; both are required.
    /// The expression model is loaded when present.
    pub fn load(model_dir: &Path) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;

        let expression_path = model_dir.join(EXPRESSION_MODEL_FILE);
        let expressions = if expression_path.exists() {
            Some(ExpressionClassifier::load(&expression_path)?)
        } else {
            tracing::warn!(
                path = %expression_path.display(),
                "expression model not found; expression classification disabled"
            );
            None
        };

        Ok(Self {
            detector,
            recognizer,
            expressions,
        })
    }
}

impl FaceEngine for OnnxEngine {
    fn detect_all(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, EngineError> {
        let rgb = image.to_rgb8();
        let boxes = self.detector.detect(&rgb)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let descriptor = self.recognizer.extract(&rgb, &bbox)?;
            faces.push(DetectedFace { bbox, descriptor });
        }
        Ok(faces)
    }

    fn detect_single(&mut self, image: &DynamicImage) -> Result<Option<DetectedFace>, EngineError> {
        let rgb = image.to_rgb8();
        // Detections are sorted by confidence.
        let Some(bbox) = self.detector.detect(&rgb)?.into_iter().next() else {
            return Ok(None);
        };
        let descriptor = self.recognizer.extract(&rgb, &bbox)?;
        Ok(Some(DetectedFace { bbox, descriptor }))
    }

    fn classify_expressions(
        &mut self,
        image: &DynamicImage,
    ) -> Result<Vec<FaceExpression>, EngineError> {
        let Some(classifier) = self.expressions.as_mut() else {
            return Err(EngineError::Unsupported("expression classification"));
        };

        let rgb = image.to_rgb8();
        let boxes = self.detector.detect(&rgb)?;

        let mut results = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let (expression, probability) = classifier.classify(&rgb, &bbox)?;
            results.push(FaceExpression {
                bbox,
                expression,
                probability,
            });
        }
        Ok(results)
    }

    fn supports_expressions(&self) -> bool {
        self.expressions.is_some()
    }
}
