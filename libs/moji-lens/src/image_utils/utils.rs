use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use super::fetch::ImageFetcher;
use super::types::{FetchError, FetchedImage, NormalizeConfig};

/// Target size when the longer side exceeds `max_dim`, `None` when the image
/// already fits.
pub fn scaled_dimensions(width: u32, height: u32, max_dim: u32) -> Option<(u32, u32)> {
    if width <= max_dim && height <= max_dim {
        return None;
    }
    let scale = max_dim as f64 / width.max(height) as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    Some((w, h))
}

fn media_type(image: &FetchedImage) -> String {
    let declared = image
        .content_type
        .as_deref()
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .filter(|ct| ct.starts_with("image/"));

    match declared {
        Some(ct) => ct.to_string(),
        None => image::guess_format(&image.bytes)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string()),
    }
}

/// Turn fetched bytes into a base64 data URL, downscaling to JPEG when the
/// image is larger than `config.max_dim` on either side.
pub fn encode_data_url(image: &FetchedImage, config: &NormalizeConfig) -> Result<String, FetchError> {
    let decoded = image::load_from_memory(&image.bytes)?;
    let (width, height) = (decoded.width(), decoded.height());

    match scaled_dimensions(width, height, config.max_dim) {
        None => Ok(format!(
            "data:{};base64,{}",
            media_type(image),
            STANDARD.encode(&image.bytes)
        )),
        Some((w, h)) => {
            log::debug!("Downscaling image {}x{} -> {}x{}", width, height, w, h);
            let resized = decoded.resize_exact(w, h, FilterType::Triangle);
            let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

            let mut buffer = Vec::new();
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, config.jpeg_quality))?;
            Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&buffer)))
        }
    }
}

/// Fetch and normalize one image. Every failure is logged and mapped to
/// `None` so a broken image never fails the scan.
pub async fn image_url_to_data_url(
    fetcher: &dyn ImageFetcher,
    url: &str,
    config: &NormalizeConfig,
) -> Option<String> {
    let fetched = match fetcher.fetch(url).await {
        Ok(fetched) => fetched,
        Err(e) => {
            log::warn!("Skipping {}: {}", url, e);
            return None;
        }
    };

    let config = config.clone();
    let encoded = tokio::task::spawn_blocking(move || encode_data_url(&fetched, &config))
        .await
        .map_err(|e| FetchError::Task(e.to_string()));

    match encoded {
        Ok(Ok(data_url)) => Some(data_url),
        Ok(Err(e)) | Err(e) => {
            log::warn!("Skipping {}: {}", url, e);
            None
        }
    }
}
