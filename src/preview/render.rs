//! Bitmap scaling and the platform rendering ports
//!
//! Frame extraction and text recognition are platform services; the
//! engine only knows them through these traits. The inert defaults
//! make both optional: without a grabber video items simply render no
//! thumbnail, and without a recognizer image titles stay as generated.

use std::path::Path;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::cache::RenderedImage;

/// Extracts a still frame from a video file
#[async_trait]
pub trait FrameGrabber: Send + Sync {
    /// Frame at time zero, or `None` when extraction is unavailable
    /// or fails
    async fn frame_at_start(&self, path: &Path) -> Option<DynamicImage>;
}

/// Grabber used when no video pipeline is wired in
#[derive(Debug, Default)]
pub struct NullFrameGrabber;

#[async_trait]
impl FrameGrabber for NullFrameGrabber {
    async fn frame_at_start(&self, _path: &Path) -> Option<DynamicImage> {
        None
    }
}

/// Recognizes text lines inside an image
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognized lines in reading order, or `None` when recognition
    /// is unavailable or finds nothing
    async fn recognize_lines(&self, image_bytes: &[u8]) -> Option<Vec<String>>;
}

/// Recognizer used when no OCR pipeline is wired in
#[derive(Debug, Default)]
pub struct NullTextRecognizer;

#[async_trait]
impl TextRecognizer for NullTextRecognizer {
    async fn recognize_lines(&self, _image_bytes: &[u8]) -> Option<Vec<String>> {
        None
    }
}

/// Scale an image to fit within `max_edge` preserving aspect ratio,
/// and encode it as PNG
pub fn scale_to_fit(image: &DynamicImage, max_edge: u32) -> Option<RenderedImage> {
    let (width, height) = (image.width(), image.height());
    let (target_width, target_height) = target_size(width, height, max_edge);

    let resized = if target_width == width && target_height == height {
        image.clone()
    } else {
        DynamicImage::ImageRgba8(image::imageops::resize(
            image,
            target_width,
            target_height,
            FilterType::Triangle,
        ))
    };

    let mut data = Vec::new();
    resized
        .write_to(&mut std::io::Cursor::new(&mut data), image::ImageFormat::Png)
        .ok()?;
    Some(RenderedImage {
        width: target_width,
        height: target_height,
        data,
    })
}

/// Decode bytes and scale; `None` on undecodable input
pub fn decode_and_scale(bytes: &[u8], max_edge: u32) -> Option<RenderedImage> {
    let decoded = image::load_from_memory(bytes).ok()?;
    scale_to_fit(&decoded, max_edge)
}

fn target_size(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }

    if width >= height {
        let scaled_height = ((height as f64) * (max_edge as f64) / (width as f64)).round() as u32;
        (max_edge, scaled_height.max(1))
    } else {
        let scaled_width = ((width as f64) * (max_edge as f64) / (height as f64)).round() as u32;
        (scaled_width.max(1), max_edge)
    }
}
