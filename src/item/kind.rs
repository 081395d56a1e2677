//! Content type taxonomy for history items
//!
//! Every content record carries exactly one of these kinds. Transient
//! kinds encode clipboard bookkeeping rather than user data and are
//! excluded from equivalence comparisons.

use serde::{Deserialize, Serialize};

/// Typed tag for a content record payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    /// Plain UTF-8 text
    PlainText,
    /// Rich text (RTF bytes)
    RichText,
    /// Formatted markup (HTML bytes)
    Markup,
    /// Uncompressed raster bitmap
    ImageBitmap,
    /// Lossless-compressed image (PNG)
    ImagePng,
    /// Lossy-compressed image (JPEG)
    ImageJpeg,
    /// High-efficiency image (HEIC)
    ImageHeic,
    /// Reference to one or more files (URI list or external path)
    FileReference,
    /// Marker left by clipboard tooling on its own quiet writes
    ModifiedMarker,
    /// Marker identifying content produced by this application
    SelfWriteMarker,
    /// Link preview metadata attached by browsers
    LinkPreview,
    /// Custom web drag-and-drop payload
    WebDragData,
    /// Source-tracking token
    SourceToken,
    /// Source-tracking URL
    SourceUrl,
    /// Rich-note format marker
    RichNoteMarker,
}

impl ContentKind {
    /// Stable string tag used in the durable store
    pub fn tag(&self) -> &'static str {
        match self {
            ContentKind::PlainText => "text/plain",
            ContentKind::RichText => "text/rtf",
            ContentKind::Markup => "text/html",
            ContentKind::ImageBitmap => "image/bmp",
            ContentKind::ImagePng => "image/png",
            ContentKind::ImageJpeg => "image/jpeg",
            ContentKind::ImageHeic => "image/heic",
            ContentKind::FileReference => "text/uri-list",
            ContentKind::ModifiedMarker => "application/x-clipkeep-modified",
            ContentKind::SelfWriteMarker => "application/x-clipkeep-self",
            ContentKind::LinkPreview => "application/x-link-preview",
            ContentKind::WebDragData => "application/x-web-drag-data",
            ContentKind::SourceToken => "application/x-source-token",
            ContentKind::SourceUrl => "application/x-source-url",
            ContentKind::RichNoteMarker => "application/x-rich-note",
        }
    }

    /// Parse a stored tag back into a kind
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "text/plain" => ContentKind::PlainText,
            "text/rtf" => ContentKind::RichText,
            "text/html" => ContentKind::Markup,
            "image/bmp" => ContentKind::ImageBitmap,
            "image/png" => ContentKind::ImagePng,
            "image/jpeg" => ContentKind::ImageJpeg,
            "image/heic" => ContentKind::ImageHeic,
            "text/uri-list" => ContentKind::FileReference,
            "application/x-clipkeep-modified" => ContentKind::ModifiedMarker,
            "application/x-clipkeep-self" => ContentKind::SelfWriteMarker,
            "application/x-link-preview" => ContentKind::LinkPreview,
            "application/x-web-drag-data" => ContentKind::WebDragData,
            "application/x-source-token" => ContentKind::SourceToken,
            "application/x-source-url" => ContentKind::SourceUrl,
            "application/x-rich-note" => ContentKind::RichNoteMarker,
            _ => return None,
        })
    }

    /// Transient kinds carry bookkeeping, not user data, and never
    /// participate in equivalence comparisons.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ContentKind::ModifiedMarker
                | ContentKind::SelfWriteMarker
                | ContentKind::LinkPreview
                | ContentKind::WebDragData
                | ContentKind::SourceToken
                | ContentKind::SourceUrl
                | ContentKind::RichNoteMarker
        )
    }

    /// Check if kind is an in-line image payload
    pub fn is_image(&self) -> bool {
        matches!(
            self,
            ContentKind::ImageBitmap
                | ContentKind::ImagePng
                | ContentKind::ImageJpeg
                | ContentKind::ImageHeic
        )
    }

    /// Check if kind is a textual payload
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            ContentKind::PlainText | ContentKind::RichText | ContentKind::Markup
        )
    }
}

/// File extensions treated as video for thumbnailing purposes.
/// Video files are excluded from plain image derivation and go
/// through frame extraction instead.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "webm"];

/// File extensions treated as still images
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "heic", "tiff", "webp"];

/// Check whether a path looks like a video file
pub fn is_video_path(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Check whether a path looks like a still image file
pub fn is_image_path(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_tag_round_trip() {
        let kinds = [
            ContentKind::PlainText,
            ContentKind::RichText,
            ContentKind::Markup,
            ContentKind::ImageBitmap,
            ContentKind::ImagePng,
            ContentKind::ImageJpeg,
            ContentKind::ImageHeic,
            ContentKind::FileReference,
            ContentKind::ModifiedMarker,
            ContentKind::SelfWriteMarker,
            ContentKind::LinkPreview,
            ContentKind::WebDragData,
            ContentKind::SourceToken,
            ContentKind::SourceUrl,
            ContentKind::RichNoteMarker,
        ];
        for kind in kinds {
            assert_eq!(ContentKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(ContentKind::from_tag("application/unknown"), None);
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ContentKind::ModifiedMarker.is_transient());
        assert!(ContentKind::SourceUrl.is_transient());
        assert!(!ContentKind::PlainText.is_transient());
        assert!(!ContentKind::FileReference.is_transient());
        assert!(!ContentKind::ImagePng.is_transient());
    }

    #[test]
    fn test_video_path_detection() {
        assert!(is_video_path(Path::new("/tmp/clip.mp4")));
        assert!(is_video_path(Path::new("/tmp/CLIP.MOV")));
        assert!(!is_video_path(Path::new("/tmp/photo.png")));
        assert!(!is_video_path(Path::new("/tmp/noext")));
        assert!(is_image_path(Path::new("/tmp/photo.jpeg")));
    }
}
