//! Multipart image uploads: reading, storing and linking.

use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::Multipart;
use image::DynamicImage;
use std::path::{Path, PathBuf};

/// Multipart field carrying images.
pub const IMAGE_FIELD: &str = "image";

/// One uploaded image as received.
pub struct Upload {
    pub file_name: Option<String>,
    pub bytes: Bytes,
}

/// Collect every `image` field of the form. Other fields are ignored.
pub async fn read_images(mut multipart: Multipart) -> Result<Vec<Upload>, ApiError> {
    let mut uploads = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await?;
        uploads.push(Upload { file_name, bytes });
    }
    Ok(uploads)
}

/// Decode on the blocking pool.
pub async fn decode(bytes: Bytes) -> Result<DynamicImage, image::ImageError> {
    match tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)).await {
        Ok(result) => result,
        Err(join) => Err(image::ImageError::IoError(std::io::Error::other(join))),
    }
}

/// Directory holding uploaded images, served under `/uploads`.
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    /// Use `dir`, creating it if needed.
    pub fn create(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the upload under a fresh random name, keeping a short
    /// alphanumeric extension from the client's file name. Returns the
    /// stored file name.
    pub async fn save(&self, upload: &Upload) -> std::io::Result<String> {
        let extension = upload
            .file_name
            .as_deref()
            .and_then(|n| Path::new(n).extension())
            .and_then(|e| e.to_str())
            .filter(|e| e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()));

        let stored = match extension {
            Some(ext) => format!("{}.{}", uuid::Uuid::new_v4(), ext.to_ascii_lowercase()),
            None => uuid::Uuid::new_v4().to_string(),
        };

        tokio::fs::write(self.dir.join(&stored), &upload.bytes).await?;
        tracing::debug!(file = %stored, bytes = upload.bytes.len(), "upload stored");
        Ok(stored)
    }
}

/// Public URL of a stored upload.
pub fn upload_url(host: &str, stored: &str) -> String {
    format!("http://{host}/uploads/{stored}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: Option<&str>) -> Upload {
        Upload {
            file_name: name.map(str::to_string),
            bytes: Bytes::from_static(b"payload"),
        }
    }

    #[tokio::test]
    async fn test_save_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::create(&dir.path().join("uploads")).unwrap();

        let stored = store.save(&upload(Some("Portrait.JPG"))).await.unwrap();
        assert!(stored.ends_with(".jpg"), "{stored}");
        assert_eq!(std::fs::read(store.dir().join(&stored)).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_save_drops_suspicious_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::create(dir.path()).unwrap();

        let stored = store.save(&upload(Some("x.p/../../g"))).await.unwrap();
        assert!(!stored.contains('/'));
        let stored = store.save(&upload(None)).await.unwrap();
        assert!(!stored.contains('.'));
    }

    #[tokio::test]
    async fn test_saved_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::create(dir.path()).unwrap();
        let a = store.save(&upload(Some("a.png"))).await.unwrap();
        let b = store.save(&upload(Some("a.png"))).await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_upload_url() {
        assert_eq!(
            upload_url("localhost:8000", "abc.png"),
            "http://localhost:8000/uploads/abc.png"
        );
    }
}
