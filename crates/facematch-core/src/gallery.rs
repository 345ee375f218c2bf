//! Known-face gallery, built once at startup from a reference directory.

use crate::engine::FaceEngine;
use crate::types::Descriptor;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read reference directory {path}: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One known person: a label and the descriptor extracted from their
/// reference image.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub label: String,
    pub descriptor: Descriptor,
}

impl GalleryEntry {
    pub fn new(label: impl Into<String>, descriptor: Descriptor) -> Self {
        Self {
            label: label.into(),
            descriptor,
        }
    }
}

/// Immutable, ordered collection of known faces.
///
/// Order is the reference directory's file-name order. Labels need not be
/// unique.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }

    /// Build the gallery from a directory of reference images.
    ///
    /// Each file contributes at most one entry, labelled with its file name
    /// up to the first `.`. Files that cannot be decoded, or in which the
    /// engine finds no face, are skipped with a warning. Only an unreadable
    /// directory is an error; an empty directory yields an empty gallery.
    pub fn load(dir: &Path, engine: &mut dyn FaceEngine) -> Result<Self, GalleryError> {
        let unreadable = |source: std::io::Error| GalleryError::DirectoryUnreadable {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for dirent in std::fs::read_dir(dir).map_err(unreadable)? {
            let dirent = dirent.map_err(unreadable)?;
            match dirent.file_type() {
                Ok(ft) if ft.is_file() => files.push(dirent.path()),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %dirent.path().display(), error = %e, "cannot stat reference entry");
                }
            }
        }
        files.sort();

        let mut entries = Vec::with_capacity(files.len());
        let mut skipped = 0usize;

        for path in &files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping reference image with non-UTF-8 name");
                skipped += 1;
                continue;
            };
            let label = label_from_file_name(file_name);

            let image = match decode_file(path) {
                Ok(img) => img,
                Err(e) => {
                    tracing::warn!(file = file_name, error = %e, "failed to decode reference image");
                    skipped += 1;
                    continue;
                }
            };

            match engine.detect_single(&image) {
                Ok(Some(face)) => {
                    tracing::debug!(file = file_name, label, "reference face loaded");
                    entries.push(GalleryEntry::new(label, face.descriptor));
                }
                Ok(None) => {
                    tracing::warn!(file = file_name, "failed to extract descriptor: no face detected");
                    skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(file = file_name, error = %e, "failed to extract descriptor");
                    skipped += 1;
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            loaded = entries.len(),
            skipped,
            "known faces loaded"
        );

        Ok(Self { entries })
    }
}

/// Decode by content, not extension: reference files may have none.
fn decode_file(path: &Path) -> image::ImageResult<image::DynamicImage> {
    image::ImageReader::open(path)?.with_guessed_format()?.decode()
}

/// Derive a person label from a reference file name: everything before the
/// first `.` (`"alice.smith.jpg"` -> `"alice"`).
pub fn label_from_file_name(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use crate::types::{BoundingBox, DetectedFace};
    use image::DynamicImage;

    /// Returns one face whose descriptor is the image width, except for
    /// images exactly 3 pixels wide which contain no face.
    struct WidthEngine;

    impl FaceEngine for WidthEngine {
        fn detect_all(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, EngineError> {
            if image.width() == 3 {
                return Ok(vec![]);
            }
            Ok(vec![DetectedFace {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: image.width() as f32,
                    height: image.height() as f32,
                    confidence: 0.9,
                    landmarks: None,
                },
                descriptor: Descriptor::new(vec![image.width() as f32]),
            }])
        }
    }

    fn write_png(dir: &Path, name: &str, width: u32) {
        image::RgbImage::new(width, 1)
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_label_from_file_name() {
        assert_eq!(label_from_file_name("alice.jpg"), "alice");
        assert_eq!(label_from_file_name("bob.smith.png"), "bob");
        assert_eq!(label_from_file_name("carol"), "carol");
        assert_eq!(label_from_file_name(".hidden"), "");
    }

    #[test]
    fn test_load_in_file_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "charlie.png", 4);
        write_png(dir.path(), "alice.png", 1);
        write_png(dir.path(), "bob.png", 2);

        let gallery = Gallery::load(dir.path(), &mut WidthEngine).unwrap();
        let labels: Vec<&str> = gallery.labels().collect();
        assert_eq!(labels, vec!["alice", "bob", "charlie"]);
        assert_eq!(gallery.entries()[2].descriptor.values(), &[4.0]);
    }

    #[test]
    fn test_load_skips_faceless_and_undecodable_files() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "alice.png", 1);
        write_png(dir.path(), "nobody.png", 3);
        std::fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();
        std::fs::create_dir(dir.path().join("subdir.png")).unwrap();

        let gallery = Gallery::load(dir.path(), &mut WidthEngine).unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.entries()[0].label, "alice");
    }

    #[test]
    fn test_load_detects_format_from_contents() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "alice.png", 1);
        let bytes = std::fs::read(dir.path().join("alice.png")).unwrap();
        std::fs::write(dir.path().join("carol"), &bytes).unwrap();
        std::fs::write(dir.path().join("dave.jpg"), &bytes).unwrap();

        let gallery = Gallery::load(dir.path(), &mut WidthEngine).unwrap();
        let labels: Vec<&str> = gallery.labels().collect();
        assert_eq!(labels, vec!["alice", "carol", "dave"]);
    }

    /// Fails on images 5 pixels wide, otherwise behaves like [`WidthEngine`].
    struct FlakyEngine;

    impl FaceEngine for FlakyEngine {
        fn detect_all(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, EngineError> {
            if image.width() == 5 {
                return Err(EngineError::InferenceFailed("tensor shape mismatch".into()));
            }
            WidthEngine.detect_all(image)
        }
    }

    #[test]
    fn test_load_continues_after_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "alice.png", 1);
        write_png(dir.path(), "broken.png", 5);
        write_png(dir.path(), "zoe.png", 2);

        let gallery = Gallery::load(dir.path(), &mut FlakyEngine).unwrap();
        let labels: Vec<&str> = gallery.labels().collect();
        assert_eq!(labels, vec!["alice", "zoe"]);
    }

    #[test]
    fn test_load_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = Gallery::load(dir.path(), &mut WidthEngine).unwrap();
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_load_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = Gallery::load(&missing, &mut WidthEngine).unwrap_err();
        assert!(matches!(err, GalleryError::DirectoryUnreadable { .. }));
    }
}
