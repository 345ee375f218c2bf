//! Nearest-neighbor search of a probe descriptor against the gallery.

use crate::gallery::GalleryEntry;
use crate::types::Descriptor;

/// Label reported when no gallery entry is close enough.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Starting best distance for a gallery scan.
///
/// Descriptor distances for a genuine match are assumed to lie below 1.0,
/// so an entry at or beyond this distance can never be reported. This is
/// independent of the recognition threshold applied by the policy.
pub const UNKNOWN_DISTANCE: f32 = 1.0;

/// Best match for a single probe descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub label: String,
    /// Euclidean distance to the matched entry (lower = more similar).
    pub distance: f32,
}

impl MatchResult {
    /// The `("unknown", 1.0)` result a scan starts from.
    pub fn unknown() -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            distance: UNKNOWN_DISTANCE,
        }
    }

    /// True for the untouched scan sentinel. No gallery entry can produce
    /// it, since replacing the sentinel needs a strictly smaller distance.
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL && self.distance == UNKNOWN_DISTANCE
    }
}

/// Strategy for finding the closest gallery entry to a probe.
pub trait Matcher {
    fn best_match(&self, probe: &Descriptor, gallery: &[GalleryEntry]) -> MatchResult;
}

/// Linear-scan Euclidean matcher.
///
/// Every entry is compared. An entry replaces the running best only when it
/// is strictly closer, so the earliest entry wins a tie.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe: &Descriptor, gallery: &[GalleryEntry]) -> MatchResult {
        let mut best_distance = UNKNOWN_DISTANCE;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let distance = probe.euclidean_distance(&entry.descriptor);
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) => MatchResult {
                label: gallery[idx].label.clone(),
                distance: best_distance,
            },
            None => MatchResult::unknown(),
        }
    }
}
