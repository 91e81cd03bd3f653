use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{AppConfig, ALLOWED_IMAGE_TYPES};
use crate::error::ApiError;
use crate::image_ops;

/// One uploaded file as received from the HTTP layer.
pub struct UploadedFile {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Metadata for a persisted attachment. `file_size` is the byte count as
/// originally received, even when the stored copy was downsized afterwards.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: i64,
}

#[derive(Clone)]
pub struct FileStorage {
    upload_dir: PathBuf,
    max_upload_bytes: usize,
    max_image_dimension: u32,
}

impl FileStorage {
    pub fn new(config: &AppConfig) -> Self {
        FileStorage {
            upload_dir: config.upload_dir.clone(),
            max_upload_bytes: config.max_upload_bytes,
            max_image_dimension: config.max_image_dimension,
        }
    }

    /// Validate, persist under a fresh UUID name, then best-effort downsize.
    /// Nothing is written for a file that fails validation.
    pub async fn store(&self, upload: UploadedFile) -> Result<StoredFile, ApiError> {
        if !ALLOWED_IMAGE_TYPES.contains(&upload.mime_type.as_str()) {
            return Err(ApiError::Validation(format!(
                "unsupported file type {:?}; allowed types: {}",
                upload.mime_type,
                ALLOWED_IMAGE_TYPES.join(", ")
            )));
        }
        if upload.data.len() > self.max_upload_bytes {
            return Err(ApiError::PayloadTooLarge {
                size: upload.data.len(),
                limit: self.max_upload_bytes,
            });
        }

        let unique_name = match Path::new(&upload.file_name)
            .extension()
            .and_then(|e| e.to_str())
        {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        let path = self.upload_dir.join(unique_name);

        fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|e| ApiError::Storage(format!("creating {}: {e}", self.upload_dir.display())))?;
        fs::write(&path, &upload.data)
            .await
            .map_err(|e| ApiError::Storage(format!("writing {}: {e}", path.display())))?;
        debug!(path = %path.display(), bytes = upload.data.len(), "stored attachment");

        // Downsizing is an optimization; a failure leaves the original bytes
        // in place and the attachment stays usable.
        let resize_path = path.clone();
        let max_dimension = self.max_image_dimension;
        let resized =
            tokio::task::spawn_blocking(move || image_ops::shrink_in_place(&resize_path, max_dimension))
                .await;
        match resized {
            Ok(Ok(true)) => debug!(path = %path.display(), "downsized attachment"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!(path = %path.display(), error = %e, "could not resize image"),
            Err(e) => warn!(path = %path.display(), error = %e, "resize task failed"),
        }

        Ok(StoredFile {
            file_path: path.to_string_lossy().into_owned(),
            file_name: upload.file_name,
            mime_type: upload.mime_type,
            file_size: upload.data.len() as i64,
        })
    }

    /// Store each upload in order. Not atomic: a failure partway leaves the
    /// earlier files on disk, unreferenced until the caller commits them.
    pub async fn store_many(
        &self,
        uploads: Vec<UploadedFile>,
    ) -> Result<Vec<StoredFile>, ApiError> {
        let mut stored = Vec::with_capacity(uploads.len());
        for upload in uploads {
            stored.push(self.store(upload).await?);
        }
        Ok(stored)
    }
}

/// Best-effort deletion of a stored attachment. A missing file is not an
/// error; any other failure is logged and reported as `false`.
pub async fn delete_file(path: &str) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path, error = %e, "failed to delete attachment file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage(dir: &Path) -> FileStorage {
        FileStorage {
            upload_dir: dir.to_path_buf(),
            max_upload_bytes: 1024 * 1024,
            max_image_dimension: 2048,
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(width, height)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn dir_entry_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn rejects_disallowed_mime_type_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());

        let result = storage
            .store(UploadedFile {
                file_name: "doc.pdf".into(),
                mime_type: "application/pdf".into(),
                data: vec![0u8; 128],
            })
            .await;

        assert!(matches!(result, Err(ApiError::Validation(_))));
        assert_eq!(dir_entry_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn rejects_oversized_upload_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = test_storage(dir.path());
        storage.max_upload_bytes = 16;

        let result = storage
            .store(UploadedFile {
                file_name: "big.png".into(),
                mime_type: "image/png".into(),
                data: vec![0u8; 17],
            })
            .await;

        assert!(matches!(result, Err(ApiError::PayloadTooLarge { .. })));
        assert_eq!(dir_entry_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn stores_and_downsizes_large_image() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());
        let original = png_bytes(3000, 1000);
        let original_len = original.len() as i64;

        let stored = storage
            .store(UploadedFile {
                file_name: "wide.png".into(),
                mime_type: "image/png".into(),
                data: original,
            })
            .await
            .unwrap();

        assert_eq!(stored.file_name, "wide.png");
        assert_eq!(stored.mime_type, "image/png");
        // Reported size is the size as received, not post-resize.
        assert_eq!(stored.file_size, original_len);
        assert!(stored.file_path.ends_with(".png"));

        let (width, height) = image::image_dimensions(&stored.file_path).unwrap();
        assert_eq!((width, height), (2048, 683));
    }

    #[tokio::test]
    async fn keeps_original_when_resize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());
        let garbage = b"png in name only".to_vec();

        let stored = storage
            .store(UploadedFile {
                file_name: "broken.png".into(),
                mime_type: "image/png".into(),
                data: garbage.clone(),
            })
            .await
            .unwrap();

        assert_eq!(std::fs::read(&stored.file_path).unwrap(), garbage);
    }

    #[tokio::test]
    async fn store_many_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());

        let stored = storage
            .store_many(vec![
                UploadedFile {
                    file_name: "first.png".into(),
                    mime_type: "image/png".into(),
                    data: png_bytes(10, 10),
                },
                UploadedFile {
                    file_name: "second.png".into(),
                    mime_type: "image/png".into(),
                    data: png_bytes(20, 20),
                },
            ])
            .await
            .unwrap();

        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].file_name, "first.png");
        assert_eq!(stored[1].file_name, "second.png");
    }

    #[tokio::test]
    async fn store_many_keeps_earlier_files_on_later_failure() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());

        let result = storage
            .store_many(vec![
                UploadedFile {
                    file_name: "ok.png".into(),
                    mime_type: "image/png".into(),
                    data: png_bytes(10, 10),
                },
                UploadedFile {
                    file_name: "nope.pdf".into(),
                    mime_type: "application/pdf".into(),
                    data: vec![0u8; 8],
                },
            ])
            .await;

        assert!(matches!(result, Err(ApiError::Validation(_))));
        assert_eq!(dir_entry_count(dir.path()), 1);
    }

    #[tokio::test]
    async fn delete_file_tolerates_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.png");

        assert!(!delete_file(&path.to_string_lossy()).await);

        std::fs::write(&path, b"bytes").unwrap();
        assert!(delete_file(&path.to_string_lossy()).await);
        assert!(!path.exists());
    }
}
