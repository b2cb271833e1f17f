use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use log::{debug, warn};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff", "gif", "heic", "webp"];

/// Image payloads a clipboard can offer, in extraction priority order.
///
/// arboard only hands out decoded pixels, so [`SystemClipboard`] never fills
/// the encoded `png` and `tiff` slots; they serve backends that expose raw
/// platform formats.
///
/// [`SystemClipboard`]: crate::platform::SystemClipboard
#[derive(Debug, Clone, Default)]
pub struct ImageSources {
    /// Direct bitmap payload (encoded PNG).
    pub png: Option<Vec<u8>>,
    /// Legacy bitmap container (encoded TIFF).
    pub tiff: Option<Vec<u8>>,
    /// Generic decoded image object.
    pub pixels: Option<RgbaImage>,
    /// File references that may point at images on disk.
    pub file_urls: Vec<PathBuf>,
}

impl ImageSources {
    pub fn is_empty(&self) -> bool {
        self.png.is_none() && self.tiff.is_none() && self.pixels.is_none() && self.file_urls.is_empty()
    }
}

#[derive(Debug)]
pub enum Snapshot {
    NoContent,
    Text(String),
    Image(DynamicImage),
}

/// Classify raw clipboard contents. An image wins over co-present text, and
/// empty text counts as no content.
pub fn classify(images: ImageSources, text: Option<String>) -> Snapshot {
    if let Some(image) = extract_image(images) {
        return Snapshot::Image(image);
    }

    match text {
        Some(text) if !text.is_empty() => Snapshot::Text(text),
        _ => Snapshot::NoContent,
    }
}

fn extract_image(images: ImageSources) -> Option<DynamicImage> {
    if let Some(img) = images
        .png
        .as_deref()
        .and_then(|data| decode_as(data, ImageFormat::Png))
    {
        return Some(img);
    }

    if let Some(img) = images
        .tiff
        .as_deref()
        .and_then(|data| decode_as(data, ImageFormat::Tiff))
    {
        return Some(img);
    }

    if let Some(pixels) = images.pixels {
        if pixels.width() > 0 && pixels.height() > 0 {
            return Some(DynamicImage::ImageRgba8(pixels));
        }
    }

    images
        .file_urls
        .iter()
        .filter(|path| has_image_extension(path))
        .find_map(|path| match image::open(path) {
            Ok(img) => Some(img),
            Err(e) => {
                debug!("Skipping unreadable image file {}: {}", path.display(), e);
                None
            }
        })
}

fn decode_as(data: &[u8], format: ImageFormat) -> Option<DynamicImage> {
    match image::load_from_memory_with_format(data, format) {
        Ok(img) => Some(img),
        Err(e) => {
            debug!("Failed to decode {:?} clipboard payload: {}", format, e);
            None
        }
    }
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Re-encode a captured image as JPEG at `quality` (1-100).
pub fn compress_image(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    // JPEG carries no alpha channel
    let rgb = image.to_rgb8();

    let mut jpeg = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
        encoder
            .encode_image(&rgb)
            .context("Failed to encode image as JPEG")?;
    }

    Ok(jpeg)
}

/// Classification followed by re-encoding; a failed encode drops the capture.
pub fn capture(images: ImageSources, text: Option<String>, quality: u8) -> Option<Captured> {
    match classify(images, text) {
        Snapshot::NoContent => None,
        Snapshot::Text(text) => Some(Captured::Text(text)),
        Snapshot::Image(img) => match compress_image(&img, quality) {
            Ok(jpeg) => Some(Captured::Image(jpeg)),
            Err(e) => {
                warn!("Dropping image capture: {:#}", e);
                None
            }
        },
    }
}

/// A classified capture ready to become a history entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Captured {
    Text(String),
    Image(Vec<u8>),
}
