//! On-disk cache for bulky content payloads
//!
//! Image and file payloads are written here instead of the durable
//! store, keyed by fresh UUIDs so paths never collide.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

/// File cache rooted at a single directory
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    /// Create a cache rooted at `root`, creating the directory if
    /// needed
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Cache rooted under the platform cache directory
    pub fn default_location() -> std::io::Result<Self> {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(base.join("clipkeep"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generate a collision-free path for a new cache file of the
    /// given category and extension
    pub fn generate_cache_file_path(&self, category: &str, extension: &str) -> PathBuf {
        self.root
            .join(category)
            .join(format!("{}.{}", Uuid::new_v4(), extension))
    }

    /// Write bytes to a fresh cache file and return its path
    pub fn store(&self, category: &str, extension: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.generate_cache_file_path(category, extension);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Delete a cache file. Idempotent: a missing file is not an
    /// error.
    pub fn delete_cache_file(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("failed to delete cache file {}: {}", path.display(), err),
        }
    }

    /// Delete every external file referenced by an item's content
    /// records
    pub fn delete_item_files(&self, item: &crate::item::HistoryItem) {
        for record in &item.contents {
            if let Some(path) = record.external_path() {
                self.delete_cache_file(path);
            }
        }
    }
}
