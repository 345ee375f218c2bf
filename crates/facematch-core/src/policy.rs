//! Recognition decisions built on the nearest-match search.
//!
//! A request may contain several faces, but it is answered with a single
//! identity: the face closest to any gallery entry decides the outcome.
//! Callers that need one answer per face can use [`rank_faces`] directly.

use crate::gallery::Gallery;
use crate::matcher::{MatchResult, Matcher, UNKNOWN_LABEL};
use crate::types::Descriptor;
use thiserror::Error;

/// Maximum accepted distance for a recognized face.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Outcome of recognizing one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// The best match was within the threshold.
    Known(MatchResult),
    /// No face was detected, or the best match was too far away.
    Unknown {
        /// Smallest distance seen across the request's faces, if any face
        /// was detected.
        closest: Option<f32>,
    },
}

impl Recognition {
    pub fn label(&self) -> &str {
        match self {
            Recognition::Known(m) => &m.label,
            Recognition::Unknown { .. } => UNKNOWN_LABEL,
        }
    }

    pub fn distance(&self) -> Option<f32> {
        match self {
            Recognition::Known(m) => Some(m.distance),
            Recognition::Unknown { closest } => *closest,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Recognition::Known(_))
    }
}

/// Matches every face against the gallery and returns the results sorted by
/// ascending distance. Faces at equal distance keep their detection order.
pub fn rank_faces(
    faces: &[Descriptor],
    gallery: &Gallery,
    matcher: &dyn Matcher,
) -> Vec<MatchResult> {
    let mut results: Vec<MatchResult> = faces
        .iter()
        .map(|probe| matcher.best_match(probe, gallery.entries()))
        .collect();
    results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    results
}

/// Threshold policy turning a request's faces into one recognition outcome.
#[derive(Debug, Clone, Copy)]
pub struct RecognitionPolicy {
    threshold: f32,
}

impl Default for RecognitionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl RecognitionPolicy {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Decide the identity for a request.
    ///
    /// No faces means unknown without consulting the matcher. Otherwise the
    /// globally closest match is accepted when its distance is at most the
    /// threshold. The scan sentinel is never accepted, whatever the threshold.
    pub fn decide(
        &self,
        faces: &[Descriptor],
        gallery: &Gallery,
        matcher: &dyn Matcher,
    ) -> Recognition {
        if faces.is_empty() {
            return Recognition::Unknown { closest: None };
        }

        let Some(best) = rank_faces(faces, gallery, matcher).into_iter().next() else {
            return Recognition::Unknown { closest: None };
        };

        if !best.is_unknown() && best.distance <= self.threshold {
            Recognition::Known(best)
        } else {
            Recognition::Unknown {
                closest: Some(best.distance),
            }
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityError {
    #[error("no faces detected in one or both images")]
    NoFaceDetected,
}

/// Raw distance between the single faces of two images.
///
/// Either side being `None` (no face found) is an error; no distance is
/// computed in that case.
pub fn pairwise_distance(
    first: Option<&Descriptor>,
    second: Option<&Descriptor>,
) -> Result<f32, SimilarityError> {
    match (first, second) {
        (Some(a), Some(b)) => Ok(a.euclidean_distance(b)),
        _ => Err(SimilarityError::NoFaceDetected),
    }
}
