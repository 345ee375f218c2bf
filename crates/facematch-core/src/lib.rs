//! facematch-core: known-face gallery and nearest-match recognition.
//!
//! Descriptors come from an injected [`FaceEngine`]; everything here works
//! on already-extracted descriptors and is free of model or image-decoding
//! concerns beyond handing images to the engine.

pub mod engine;
pub mod gallery;
pub mod matcher;
pub mod policy;
pub mod types;

pub use engine::{EngineError, FaceEngine};
pub use gallery::{Gallery, GalleryEntry, GalleryError};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher, UNKNOWN_DISTANCE, UNKNOWN_LABEL};
pub use policy::{
    pairwise_distance, rank_faces, Recognition, RecognitionPolicy, SimilarityError,
    DEFAULT_MATCH_THRESHOLD,
};
pub use types::{BoundingBox, Descriptor, DetectedFace, Expression, FaceExpression};
