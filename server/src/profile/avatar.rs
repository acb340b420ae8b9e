//! Avatar normalisation: decode, check dimensions, flatten onto white and
//! re-encode as JPEG.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops;
use image::{GenericImageView, ImageFormat, ImageReader, Limits, Rgba, RgbaImage};
use thiserror::Error;
use uuid::Uuid;

/// Required edge length, in pixels.
pub const AVATAR_SIZE: u32 = 512;

/// Largest upload accepted (8 MB).
pub const MAX_AVATAR_BYTES: usize = 8 * 1024 * 1024;

const JPEG_QUALITY: u8 = 85;

#[derive(Error, Debug)]
pub enum AvatarError {
    #[error("avatar file is too large")]
    TooLarge,
    #[error("avatar must be a valid image file")]
    Decode,
    #[error("avatar must be 512x512")]
    Dimensions,
    #[error("avatar encoding failed: {0}")]
    Encode(String),
}

/// Decodes an uploaded image and returns JPEG bytes.
///
/// CPU-bound; call from `spawn_blocking`.
pub fn normalize_avatar(data: &[u8]) -> Result<Vec<u8>, AvatarError> {
    if data.len() > MAX_AVATAR_BYTES {
        return Err(AvatarError::TooLarge);
    }

    let mut reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|_| AvatarError::Decode)?;
    if !matches!(
        reader.format(),
        Some(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP)
    ) {
        return Err(AvatarError::Decode);
    }
    let mut limits = Limits::default();
    limits.max_image_width = Some(AVATAR_SIZE * 4);
    limits.max_image_height = Some(AVATAR_SIZE * 4);
    reader.limits(limits);

    let img = reader.decode().map_err(|_| AvatarError::Decode)?;
    if img.dimensions() != (AVATAR_SIZE, AVATAR_SIZE) {
        return Err(AvatarError::Dimensions);
    }

    let mut canvas = RgbaImage::from_pixel(AVATAR_SIZE, AVATAR_SIZE, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
    let flattened = image::DynamicImage::ImageRgba8(canvas).to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(&flattened)
        .map_err(|e| AvatarError::Encode(e.to_string()))?;
    Ok(out)
}

/// Fresh file name for one upload; stored on the user row when the
/// guarded write applies.
pub fn avatar_file_name(user_id: Uuid) -> String {
    format!("{user_id}-{}.jpg", Uuid::now_v7().simple())
}

/// Writes `jpeg` under `dir` via a temp file and rename.
pub async fn store_avatar(dir: &Path, file_name: &str, jpeg: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(file_name);
    let tmp = dir.join(format!(".{file_name}.{}.tmp", Uuid::now_v7()));
    if let Err(e) = tokio::fs::write(&tmp, jpeg).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, &target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(target)
}

/// Deletes `file_name` under `dir`. A missing file is not an error.
pub async fn remove_avatar(dir: &Path, file_name: &str) -> std::io::Result<()> {
    if file_name.is_empty() || file_name.contains(['/', '\\']) || file_name.starts_with('.') {
        return Ok(());
    }
    match tokio::fs::remove_file(dir.join(file_name)).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use image::DynamicImage;

    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::new_rgba8(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_normalize_produces_jpeg() {
        let jpeg = normalize_avatar(&png(512, 512)).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (512, 512));
    }

    #[test]
    fn test_wrong_dimensions_rejected() {
        assert!(matches!(
            normalize_avatar(&png(256, 512)),
            Err(AvatarError::Dimensions)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            normalize_avatar(b"definitely not an image"),
            Err(AvatarError::Decode)
        ));
    }

    #[tokio::test]
    async fn test_store_avatar_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::now_v7();
        let name = avatar_file_name(id);
        let path = store_avatar(dir.path(), &name, b"jpeg").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"jpeg");
        assert!(name.starts_with(&format!("{id}-")));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn test_each_upload_gets_its_own_name() {
        let id = Uuid::now_v7();
        assert_ne!(avatar_file_name(id), avatar_file_name(id));
    }

    #[tokio::test]
    async fn test_remove_avatar() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_avatar(dir.path(), "a.jpg", b"jpeg").await.unwrap();

        remove_avatar(dir.path(), "a.jpg").await.unwrap();
        assert!(!path.exists());
        // Already gone, and names that escape the directory, are ignored.
        remove_avatar(dir.path(), "a.jpg").await.unwrap();
        remove_avatar(dir.path(), "../a.jpg").await.unwrap();
    }
}
