//! Face extraction capability consumed by the gallery loader and the daemon.

use crate::types::{DetectedFace, FaceExpression};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),
}

/// Face detection and descriptor extraction.
///
/// Implementations own their model state, hence `&mut self`. Callers that
/// need concurrency put the engine behind a dedicated thread.
pub trait FaceEngine: Send {
    /// Detect every face in the image and extract a descriptor for each,
    /// ordered by detection confidence (highest first).
    fn detect_all(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, EngineError>;

    /// Detect at most one face: the most confident one.
    fn detect_single(&mut self, image: &DynamicImage) -> Result<Option<DetectedFace>, EngineError> {
        let faces = self.detect_all(image)?;
        Ok(faces.into_iter().reduce(|best, face| {
            if face.bbox.confidence > best.bbox.confidence {
                face
            } else {
                best
            }
        }))
    }

    /// Classify the expression of every detected face.
    fn classify_expressions(
        &mut self,
        _image: &DynamicImage,
    ) -> Result<Vec<FaceExpression>, EngineError> {
        Err(EngineError::Unsupported("expression classification"))
    }

    /// Whether [`classify_expressions`](Self::classify_expressions) is available.
    fn supports_expressions(&self) -> bool {
        false
    }
}
