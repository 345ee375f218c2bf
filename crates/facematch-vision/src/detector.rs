//! SCRFD face detector via ONNX Runtime.
//!
//! Color images are letterboxed into the 640×640 model input (image at the
//! top-left, zero padding elsewhere), decoded per stride with 2 anchors per
//! cell, then filtered with greedy NMS.

use facematch_core::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Raw tensors of one stride level, flattened.
struct StrideTensors<'a> {
    stride: u32,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    layout: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps for 3 strides), got {}",
                names.len()
            )));
        }

        let layout = stride_outputs(&names);
        tracing::info!(path = %model_path.display(), ?names, ?layout, "loaded SCRFD model");

        Ok(Self { session, layout })
    }

    /// Detect faces, most confident first. Coordinates are in `image` pixels.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, scale) = letterbox(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let idx = self.layout[level];
            let tensor = |i: usize, what: &'static str| {
                outputs[i]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let level_tensors = StrideTensors {
                stride,
                scores: tensor(idx.score, "scores")?,
                bboxes: tensor(idx.bbox, "bboxes")?,
                kps: tensor(idx.kps, "kps")?,
            };
            candidates.extend(decode_stride(&level_tensors, scale, SCRFD_CONFIDENCE_THRESHOLD));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

/// Scale `image` to fit the model input and lay it into a zero-padded NCHW
/// tensor. Returns the tensor and the applied scale factor.
fn letterbox(image: &RgbImage) -> (Array4<f32>, f32) {
    let (width, height) = image.dimensions();
    let size = SCRFD_INPUT_SIZE as f32;
    let scale = (size / width.max(1) as f32).min(size / height.max(1) as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let side = SCRFD_INPUT_SIZE as usize;
    let pad = (0.0 - SCRFD_MEAN) / SCRFD_STD;
    let mut tensor = Array4::<f32>::from_elem((1, 3, side, side), pad);
    for (x, y, px) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, scale)
}

/// Map output tensor names to stride slots.
///
/// Exports with `score_8`/`bbox_8`/`kps_8`-style names are matched by name;
/// anything else uses the standard order: scores, then bboxes, then kps,
/// each for strides 8, 16, 32.
fn stride_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let position = |kind: &str, stride: u32| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| {
            Some(StrideOutputs {
                score: position("score", s)?,
                bbox: position("bbox", s)?,
                kps: position("kps", s)?,
            })
        })
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => std::array::from_fn(|level| StrideOutputs {
            score: level,
            bbox: level + 3,
            kps: level + 6,
        }),
    }
}

/// Decode candidate boxes of one stride level above `threshold`, mapped back
/// to source-image coordinates by `scale`.
fn decode_stride(level: &StrideTensors<'_>, scale: f32, threshold: f32) -> Vec<BoundingBox> {
    let stride = level.stride as f32;
    let grid_w = (SCRFD_INPUT_SIZE / level.stride) as usize;
    let grid_h = grid_w;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;

    (0..anchors.min(level.scores.len()))
        .filter(|&i| level.scores[i] > threshold)
        .filter_map(|i| {
            let cell = i / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * stride;
            let cy = (cell / grid_w) as f32 * stride;

            let d = level.bboxes.get(i * 4..i * 4 + 4)?;
            let x1 = (cx - d[0] * stride) / scale;
            let y1 = (cy - d[1] * stride) / scale;
            let x2 = (cx + d[2] * stride) / scale;
            let y2 = (cy + d[3] * stride) / scale;

            let landmarks = level.kps.get(i * 10..i * 10 + 10).map(|k| {
                std::array::from_fn(|p| {
                    (
                        (cx + k[p * 2] * stride) / scale,
                        (cy + k[p * 2 + 1] * stride) / scale,
                    )
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: level.scores[i],
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; result is sorted by confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let candidates = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let kept = nms(candidates, 0.4);
        let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_stride_outputs_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let outputs = stride_outputs(&names);
        assert_eq!(outputs[0], StrideOutputs { score: 2, bbox: 0, kps: 1 });
        assert_eq!(outputs[2], StrideOutputs { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_stride_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i| format!("{}", 400 + i)).collect();
        let outputs = stride_outputs(&names);
        assert_eq!(outputs[1], StrideOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_letterbox_scale_and_padding() {
        let image = RgbImage::from_pixel(320, 160, Rgb([255, 255, 255]));
        let (tensor, scale) = letterbox(&image);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((scale - 2.0).abs() < 1e-6);
        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        let pad = -SCRFD_MEAN / SCRFD_STD;
        assert!((tensor[[0, 0, 100, 100]] - white).abs() < 1e-3);
        // Image occupies rows 0..320; below is padding.
        assert!((tensor[[0, 2, 500, 100]] - pad).abs() < 1e-6);
    }

    #[test]
    fn test_decode_maps_back_to_source_coordinates() {
        // One confident anchor at cell (1, 2) on stride 32 with unit offsets.
        let stride = 32u32;
        let grid = (SCRFD_INPUT_SIZE / stride) as usize;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let hit = (2 * grid + 1) * SCRFD_ANCHORS_PER_CELL;

        let mut scores = vec![0.0f32; anchors];
        scores[hit] = 0.95;
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        let level = StrideTensors { stride, scores: &scores, bboxes: &bboxes, kps: &kps };
        let boxes = decode_stride(&level, 2.0, 0.5);

        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        // Anchor centre (32, 64) in input space is (16, 32) in the source.
        assert!((b.x - 0.0).abs() < 1e-4, "x = {}", b.x);
        assert!((b.y - 16.0).abs() < 1e-4, "y = {}", b.y);
        assert!((b.width - 32.0).abs() < 1e-4);
        let lms = b.landmarks.unwrap();
        assert!((lms[0].0 - 16.0).abs() < 1e-4 && (lms[0].1 - 32.0).abs() < 1e-4);
    }
}
