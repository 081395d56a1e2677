//! History items and their content records
//!
//! A history item is one clipboard entry, aggregated from several typed
//! content records plus copy metadata. Accessors derive text, image and
//! file views from the records; all of them treat malformed payloads as
//! absent rather than errors.

pub mod kind;

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

pub use kind::{is_image_path, is_video_path, ContentKind};

/// Number of characters a generated title is clamped to
pub const TITLE_MAX_CHARS: usize = 1_000;

/// Payload of a content record. Exactly one form is authoritative for
/// a given kind: bulky image/file data may live in an external cache
/// file, everything else stays in-line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Bytes stored in-line in the durable store
    Inline(Vec<u8>),
    /// Path of an externally cached file holding the bytes
    External(PathBuf),
}

/// One typed payload belonging to a history item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub kind: ContentKind,
    pub payload: Payload,
}

impl ContentRecord {
    /// Create an in-line record
    pub fn inline(kind: ContentKind, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: Payload::Inline(bytes.into()),
        }
    }

    /// Create an externally backed record
    pub fn external(kind: ContentKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            payload: Payload::External(path.into()),
        }
    }

    /// In-line bytes, if this record carries them
    pub fn inline_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Inline(bytes) => Some(bytes),
            Payload::External(_) => None,
        }
    }

    /// External file path, if this record is file-backed
    pub fn external_path(&self) -> Option<&Path> {
        match &self.payload {
            Payload::Inline(_) => None,
            Payload::External(path) => Some(path),
        }
    }
}

/// One durably stored clipboard entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Stable identifier, minted at creation and kept through merges
    pub id: Uuid,
    /// Content records; order is irrelevant
    pub contents: Vec<ContentRecord>,
    pub first_copied_at: DateTime<Utc>,
    pub last_copied_at: DateTime<Utc>,
    /// How many times equivalent content has been copied
    pub copies: u32,
    /// Quick-access pin character, unique across all items
    pub pin: Option<char>,
    /// Identifier of the source application, when known
    pub application: Option<String>,
    /// Cached display string
    pub title: String,
    /// Set when the item arrived through cross-device clipboard
    /// sharing; its file paths are not meaningful locally.
    pub remote: bool,
    /// Bumped on every synchronous title write so an in-flight text
    /// recognition result can detect it has been outpaced.
    #[serde(default)]
    pub title_generation: u64,
}

impl HistoryItem {
    /// Create a freshly captured item
    pub fn new(contents: Vec<ContentRecord>, application: Option<String>, remote: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            contents,
            first_copied_at: now,
            last_copied_at: now,
            copies: 1,
            pin: None,
            application,
            title: String::new(),
            remote,
            title_generation: 0,
        }
    }

    fn record_of(&self, kind: ContentKind) -> Option<&ContentRecord> {
        self.contents.iter().find(|r| r.kind == kind)
    }

    /// Value of the quiet-write marker, when present
    pub fn modified_marker(&self) -> Option<i64> {
        let record = self.record_of(ContentKind::ModifiedMarker)?;
        let bytes = record.inline_bytes()?;
        std::str::from_utf8(bytes).ok()?.trim().parse().ok()
    }

    /// True when the item was written by this application itself
    pub fn is_self_generated(&self) -> bool {
        self.record_of(ContentKind::SelfWriteMarker).is_some()
    }

    /// True when the item holds only textual user content — no image
    /// and no file reference among its non-transient records.
    pub fn is_text_only(&self) -> bool {
        let mut has_text = false;
        for record in &self.contents {
            if record.kind.is_transient() {
                continue;
            }
            if record.kind.is_image() || record.kind == ContentKind::FileReference {
                return false;
            }
            if record.kind.is_text() {
                has_text = true;
            }
        }
        has_text
    }

    /// Plain text view of the item, when one exists
    pub fn derive_text(&self) -> Option<String> {
        let record = self.record_of(ContentKind::PlainText)?;
        let bytes = record.inline_bytes()?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn derive_rich_text(&self) -> Option<String> {
        let record = self.record_of(ContentKind::RichText)?;
        let bytes = record.inline_bytes()?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn derive_markup_text(&self) -> Option<String> {
        let record = self.record_of(ContentKind::Markup)?;
        let bytes = record.inline_bytes()?;
        let markup = String::from_utf8(bytes.to_vec()).ok()?;
        Some(strip_markup(&markup))
    }

    /// True when the item exposes textual, rich or in-line image
    /// content of its own, i.e. content that is meaningful without
    /// resolving file paths.
    fn has_local_content(&self) -> bool {
        self.contents
            .iter()
            .any(|r| r.kind.is_text() || r.kind.is_image())
    }

    /// File paths referenced by the item, deduplicated by path.
    ///
    /// A path recorded both as an external payload and inside an
    /// in-line URI list is counted once. Cross-device items expose no
    /// local paths unless paths are all the content they have.
    pub fn derive_file_paths(&self) -> Vec<PathBuf> {
        if self.remote && self.has_local_content() {
            return Vec::new();
        }

        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut paths = Vec::new();
        for record in &self.contents {
            if record.kind != ContentKind::FileReference {
                continue;
            }
            match &record.payload {
                Payload::External(path) => {
                    if seen.insert(path.clone()) {
                        paths.push(path.clone());
                    }
                }
                Payload::Inline(bytes) => {
                    let Ok(list) = std::str::from_utf8(bytes) else {
                        continue;
                    };
                    for line in list.lines() {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let path = match line.strip_prefix("file://") {
                            Some(rest) => PathBuf::from(percent_decode(rest)),
                            None => PathBuf::from(line),
                        };
                        if seen.insert(path.clone()) {
                            paths.push(path);
                        }
                    }
                }
            }
        }
        paths
    }

    /// First referenced path that looks like a still image
    pub fn image_file_path(&self) -> Option<PathBuf> {
        self.derive_file_paths()
            .into_iter()
            .find(|p| is_image_path(p))
    }

    /// First referenced path that looks like a video
    pub fn video_file_path(&self) -> Option<PathBuf> {
        self.derive_file_paths()
            .into_iter()
            .find(|p| is_video_path(p))
    }

    /// Raw bytes of the best available image representation.
    ///
    /// Externally stored image payloads win over in-line ones; a
    /// cross-device item falls back to reading its shared file path.
    /// Video content never counts as an image.
    pub fn image_bytes(&self) -> Option<Vec<u8>> {
        for record in &self.contents {
            if !record.kind.is_image() {
                continue;
            }
            if let Some(path) = record.external_path() {
                if let Some(bytes) = read_file_bytes(path) {
                    return Some(bytes);
                }
            }
        }
        for record in &self.contents {
            if !record.kind.is_image() {
                continue;
            }
            if let Some(bytes) = record.inline_bytes() {
                return Some(bytes.to_vec());
            }
        }
        if self.remote {
            if let Some(path) = self.derive_file_paths().first() {
                return read_file_bytes(path);
            }
        }
        None
    }

    /// Decoded image view of the item, absent when no image content
    /// exists or the bytes do not decode
    pub fn derive_image(&self) -> Option<image::DynamicImage> {
        let bytes = self.image_bytes()?;
        image::load_from_memory(&bytes).ok()
    }

    /// Best derivable textual preview: file names, then plain text,
    /// then rich text, then markup text, then whatever title the item
    /// already carries.
    pub fn text_preview(&self) -> String {
        let paths = self.derive_file_paths();
        if !paths.is_empty() {
            return paths
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                .collect::<Vec<_>>()
                .join("\n");
        }
        self.derive_text()
            .or_else(|| self.derive_rich_text())
            .or_else(|| self.derive_markup_text())
            .unwrap_or_else(|| self.title.clone())
    }

    /// Compute a display title for the item.
    ///
    /// Image-bearing items yield an empty or file-name title plus the
    /// image bytes to feed asynchronous text recognition; everything
    /// else falls back to a clamped textual preview.
    pub fn generate_title(&self, visible_whitespace: bool) -> GeneratedTitle {
        if let Some(path) = self
            .derive_file_paths()
            .into_iter()
            .find(|p| is_image_path(p) || is_video_path(p))
        {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if !name.is_empty() {
                    let recognition_source =
                        read_file_bytes(&path).filter(|b| image::load_from_memory(b).is_ok());
                    return GeneratedTitle {
                        title: name.to_string(),
                        recognition_source,
                    };
                }
            }
        }

        if let Some(bytes) = self.inline_image_bytes() {
            if image::load_from_memory(&bytes).is_ok() {
                return GeneratedTitle {
                    title: String::new(),
                    recognition_source: Some(bytes),
                };
            }
        }

        let preview: String = self.text_preview().chars().take(TITLE_MAX_CHARS).collect();
        let title = if visible_whitespace {
            humanize_whitespace(&preview)
        } else {
            preview.trim().to_string()
        };
        GeneratedTitle {
            title,
            recognition_source: None,
        }
    }

    fn inline_image_bytes(&self) -> Option<Vec<u8>> {
        self.contents
            .iter()
            .filter(|r| r.kind.is_image())
            .find_map(|r| r.inline_bytes().map(|b| b.to_vec()))
    }

    /// True when the item has content a thumbnail or preview can be
    /// rendered from
    pub fn has_renderable_image(&self) -> bool {
        self.video_file_path().is_some()
            || self.image_file_path().is_some()
            || self.contents.iter().any(|r| r.kind.is_image())
    }

    /// Canonical text used for equivalence matching
    pub fn canonical_text(&self) -> String {
        self.derive_text().unwrap_or_else(|| self.text_preview())
    }
}

/// Result of title generation: the synchronous title plus the image
/// bytes recognition should run over, when applicable
#[derive(Debug)]
pub struct GeneratedTitle {
    pub title: String,
    pub recognition_source: Option<Vec<u8>>,
}

/// Read bytes from an externally cached file, treating failures as
/// "no data". Permission errors stay silent since they are expected
/// under sandbox restrictions; anything else is logged.
pub(crate) fn read_file_bytes(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => None,
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            warn!("failed to read cached file {}: {}", path.display(), err);
            None
        }
    }
}

/// Replace leading/trailing spaces with a visible placeholder and map
/// newline/tab to visible glyphs
fn humanize_whitespace(text: &str) -> String {
    let trimmed = text.trim_matches(' ');
    let leading = text.len() - text.trim_start_matches(' ').len();
    let trailing = if trimmed.is_empty() {
        0
    } else {
        text.len() - text.trim_end_matches(' ').len()
    };
    let mut out = String::with_capacity(text.len());
    for _ in 0..leading {
        out.push('·');
    }
    for ch in trimmed.chars() {
        match ch {
            '\n' => out.push('⏎'),
            '\t' => out.push('⇥'),
            other => out.push(other),
        }
    }
    for _ in 0..trailing {
        out.push('·');
    }
    out
}

/// Minimal tag stripper for markup previews
fn strip_markup(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut in_tag = false;
    for ch in markup.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            other if !in_tag => out.push(other),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Decode the percent-escapes that matter in file URLs
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
