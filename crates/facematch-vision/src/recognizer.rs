//! ArcFace descriptor extraction via ONNX Runtime.
//!
//! Produces 512-dimensional descriptors from faces aligned to the canonical
//! 112×112 crop (w600k_r50 model).
//!
//! Descriptors are L2-normalized and then scaled to length
//! [`DESCRIPTOR_NORM`]. Euclidean distance between two descriptors is then
//! `sqrt((1 - cos) / 2)`, which lies in `[0, 1]`: a cosine similarity of 0.5
//! sits exactly at the default 0.5 match threshold, and only opposite
//! vectors reach the 1.0 unknown distance.

use crate::alignment::{self, ALIGNED_SIZE};
use facematch_core::{BoundingBox, Descriptor};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // not 128.0: ArcFace normalizes symmetrically
const ARCFACE_DESCRIPTOR_DIM: usize = 512;

/// Length of every emitted descriptor.
pub const DESCRIPTOR_NORM: f32 = 0.5;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; alignment needs the 5 detector keypoints")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based descriptor extractor.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract the descriptor of `face` in `image`.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Descriptor, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(image, landmarks);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != ARCFACE_DESCRIPTOR_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(descriptor_from_embedding(raw))
    }
}

/// Aligned RGB crop to a normalized NCHW tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

/// Map a raw ArcFace embedding into the matcher's distance space.
fn descriptor_from_embedding(raw: &[f32]) -> Descriptor {
    Descriptor::new(l2_normalize(raw).into_iter().map(|x| x * DESCRIPTOR_NORM).collect())
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let aligned = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([128, 128, 128]));
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_keeps_channel_order() {
        let aligned = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([255, 127, 0]));
        let tensor = preprocess(&aligned);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] - (127.0 - 127.5) / 127.5).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    /// Unit vector at angle `theta` in the first two of 512 dimensions.
    fn embedding(theta: f32, length: f32) -> Vec<f32> {
        let mut v = vec![0.0; ARCFACE_DESCRIPTOR_DIM];
        v[0] = theta.cos() * length;
        v[1] = theta.sin() * length;
        v
    }

    #[test]
    fn test_descriptor_distance_spans_unit_range() {
        let a = descriptor_from_embedding(&embedding(0.0, 3.0));
        assert!((a.values().iter().map(|x| x * x).sum::<f32>().sqrt() - DESCRIPTOR_NORM).abs() < 1e-6);

        let same = descriptor_from_embedding(&embedding(0.0, 7.0));
        assert!(a.euclidean_distance(&same) < 1e-6);

        let opposite = descriptor_from_embedding(&embedding(std::f32::consts::PI, 1.0));
        assert!((a.euclidean_distance(&opposite) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_same_identity_cosine_fits_default_threshold() {
        // Cosine 0.6 is a typical same-person ArcFace score.
        let a = descriptor_from_embedding(&embedding(0.0, 1.0));
        let b = descriptor_from_embedding(&embedding(0.6f32.acos(), 1.0));
        let distance = a.euclidean_distance(&b);
        assert!((distance - 0.2f32.sqrt()).abs() < 1e-5, "{distance}");
        assert!(distance <= facematch_core::DEFAULT_MATCH_THRESHOLD);

        // Cosine 0.3 is a different person.
        let c = descriptor_from_embedding(&embedding(0.3f32.acos(), 1.0));
        assert!(a.euclidean_distance(&c) > facematch_core::DEFAULT_MATCH_THRESHOLD);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
