use anyhow::{Result, anyhow};
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};

pub fn detect_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"BM") {
        return Some("image/bmp");
    }
    None
}

pub fn mime_to_format(mime_type: &str) -> Result<ImageFormat> {
    match mime_type {
        "image/png" => Ok(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Ok(ImageFormat::Jpeg),
        "image/gif" => Ok(ImageFormat::Gif),
        "image/webp" => Ok(ImageFormat::WebP),
        "image/bmp" => Ok(ImageFormat::Bmp),
        _ => Err(anyhow!("unsupported image type: {mime_type}")),
    }
}

/// Decodes an uploaded payload into an RGB buffer.
///
/// The format is sniffed from the leading bytes; the declared content type is
/// only consulted when sniffing fails.
pub fn decode_image(bytes: &[u8], declared_mime: Option<&str>) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(anyhow!("empty payload"));
    }
    let mime_type = detect_mime_type(bytes)
        .or(declared_mime)
        .ok_or_else(|| anyhow!("unrecognized image format"))?;
    let format = mime_to_format(mime_type)?;
    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|err| anyhow!("decode image failed: {err}"))?;
    Ok(image.to_rgb8())
}

/// Shrinks `image` so its longer side is at most `max_dimension`. Never upscales.
pub fn downscale_to_max(image: &RgbImage, max_dimension: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let longer = width.max(height);
    if max_dimension == 0 || longer <= max_dimension {
        return image.clone();
    }
    let scale = max_dimension as f64 / longer as f64;
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_dimension);
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_dimension);
    imageops::resize(image, new_width, new_height, FilterType::Lanczos3)
}

pub fn encode_png(image: &RgbImage, fast: bool) -> Result<Vec<u8>> {
    let compression = if fast {
        CompressionType::Fast
    } else {
        CompressionType::Default
    };
    let mut output = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut output, compression, PngFilter::Adaptive);
    image
        .write_with_encoder(encoder)
        .map_err(|err| anyhow!("encode png failed: {err}"))?;
    Ok(output)
}
