use std::path::Path;

use anyhow::{Context, Result};
use image::{GenericImageView, ImageFormat, ImageReader};

/// JPEG quality used when re-encoding a downsized image.
const JPEG_QUALITY: u8 = 85;

/// Shrink the image at `path` in place so that neither dimension exceeds
/// `max_dimension`, preserving aspect ratio and the original format.
///
/// Returns `Ok(false)` when the image is already within bounds. Callers treat
/// any error as non-fatal: the unresized original stays on disk and remains
/// usable.
pub fn shrink_in_place(path: &Path, max_dimension: u32) -> Result<bool> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .context("failed to guess image format")?;
    let format = reader.format();

    let img = reader.decode().context("failed to decode image")?;
    let (width, height) = img.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return Ok(false);
    }

    let (new_width, new_height) = scaled_dimensions(width, height, max_dimension);
    let resized = img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3);

    match format {
        Some(ImageFormat::Jpeg) | None => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to rewrite {}", path.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            resized
                .write_with_encoder(encoder)
                .context("failed to encode resized JPEG")?;
        }
        Some(format) => {
            resized
                .save_with_format(path, format)
                .context("failed to encode resized image")?;
        }
    }

    Ok(true)
}

/// Scale so the larger dimension lands exactly on `max_dimension`.
fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width >= height {
        let ratio = max_dimension as f64 / width as f64;
        (max_dimension, (height as f64 * ratio).round() as u32)
    } else {
        let ratio = max_dimension as f64 / height as f64;
        ((width as f64 * ratio).round() as u32, max_dimension)
    }
}
