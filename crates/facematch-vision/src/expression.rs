//! FER+ facial expression classifier via ONNX Runtime.
//!
//! The emotion-ferplus-8 model takes a 64×64 grayscale face crop with raw
//! 0–255 pixel values and emits 8 unnormalized class scores.

use facematch_core::{BoundingBox, Expression};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FERPLUS_INPUT_SIZE: u32 = 64;

/// Class order of the FER+ output tensor.
const FERPLUS_CLASSES: [Expression; 8] = [
    Expression::Neutral,
    Expression::Happy,
    Expression::Surprised,
    Expression::Sad,
    Expression::Angry,
    Expression::Disgusted,
    Expression::Fearful,
    Expression::Contempt,
];

#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the image")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn load(model_path: &Path) -> Result<Self, ExpressionError> {
        if !model_path.exists() {
            return Err(ExpressionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded FER+ model");

        Ok(Self { session })
    }

    /// Most probable expression for the face inside `face`, with its softmax
    /// probability.
    pub fn classify(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<(Expression, f32), ExpressionError> {
        let crop = face_crop(image, face).ok_or(ExpressionError::EmptyCrop)?;
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExpressionError::InferenceFailed(format!("expression scores: {e}")))?;

        if scores.len() != FERPLUS_CLASSES.len() {
            return Err(ExpressionError::InferenceFailed(format!(
                "expected {} class scores, got {}",
                FERPLUS_CLASSES.len(),
                scores.len()
            )));
        }

        Ok(top_expression(&softmax(scores)))
    }
}

/// Grayscale crop of `face`, clamped to the image and resized to the model
/// input. `None` when the clamped box is empty.
fn face_crop(image: &RgbImage, face: &BoundingBox) -> Option<GrayImage> {
    let (w, h) = image.dimensions();
    let x0 = face.x.max(0.0).floor() as u32;
    let y0 = face.y.max(0.0).floor() as u32;
    let x1 = ((face.x + face.width).ceil().max(0.0) as u32).min(w);
    let y1 = ((face.y + face.height).ceil().max(0.0) as u32).min(h);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let region = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    let gray = image::DynamicImage::ImageRgb8(region).to_luma8();
    Some(imageops::resize(
        &gray,
        FERPLUS_INPUT_SIZE,
        FERPLUS_INPUT_SIZE,
        FilterType::Triangle,
    ))
}

fn preprocess(crop: &GrayImage) -> Array4<f32> {
    let size = FERPLUS_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for (x, y, px) in crop.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = px[0] as f32;
    }
    tensor
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn top_expression(probabilities: &[f32]) -> (Expression, f32) {
    probabilities
        .iter()
        .zip(FERPLUS_CLASSES)
        .map(|(&p, class)| (class, p))
        .fold((Expression::Neutral, f32::NEG_INFINITY), |best, cur| {
            if cur.1 > best.1 {
                cur
            } else {
                best
            }
        })
}
