//! Recipe image validation and storage on the local media directory.

use anyhow::{Context, Result};
use axum::body::Bytes;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::error::ApiError;

/// Directory under the media root that recipe images are written to
pub const UPLOAD_DIR: &str = "uploads/recipe";

const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// File extension for a decoded format
fn extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Ico => "ico",
        _ => "img",
    }
}

/// Decode the payload fully; anything that is not a real image is a validation error
pub fn validate_image(bytes: &[u8]) -> Result<ImageFormat, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::validation("image", "The submitted file is empty."));
    }

    let format = image::guess_format(bytes).map_err(|e| {
        tracing::debug!("Rejected upload with unknown format: {}", e);
        ApiError::validation("image", INVALID_IMAGE)
    })?;

    image::load_from_memory_with_format(bytes, format).map_err(|e| {
        tracing::debug!("Rejected {:?} upload that failed to decode: {}", format, e);
        ApiError::validation("image", INVALID_IMAGE)
    })?;

    Ok(format)
}

/// Writes uploaded images under the media root and builds their public URLs
#[derive(Debug, Clone)]
pub struct ImageStorage {
    root: PathBuf,
    url: String,
}

impl ImageStorage {
    pub fn new(config: &MediaConfig) -> Self {
        let mut url = config.url.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        Self {
            root: config.root.clone(),
            url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate and store an upload under a fresh random name.
    ///
    /// Returns the path relative to the media root. Nothing is written when validation fails.
    pub async fn save(&self, bytes: Bytes) -> Result<String, ApiError> {
        let payload = bytes.clone();
        let format = tokio::task::spawn_blocking(move || validate_image(&payload))
            .await
            .context("Image validation task failed")??;

        let relative = format!("{}/{}.{}", UPLOAD_DIR, Uuid::new_v4(), extension(format));
        let path = self.root.join(&relative);

        let dir = self.root.join(UPLOAD_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write image {}", path.display()))?;

        tracing::info!("Stored recipe image {} ({} bytes)", relative, bytes.len());
        Ok(relative)
    }

    /// Best-effort removal of a stored image
    pub async fn remove(&self, relative: &str) {
        let path = self.root.join(relative);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove image {}: {}", path.display(), e);
            }
        }
    }

    /// Public URL for a stored image
    pub fn url_for(&self, relative: &str) -> String {
        format!("{}{}", self.url, relative)
    }
}
