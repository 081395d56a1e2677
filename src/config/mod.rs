//! Configuration for the history engine
//!
//! Loaded from TOML; every field has a default so a missing or empty
//! file yields a working configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheLimits;
use crate::dedup::Deduplicator;
use crate::pins::PinManager;
use crate::preview::PreviewConfig;
use crate::retention::RetentionLimiter;
use crate::sort::{PinPlacement, SortKey, Sorter};
use std::time::Duration;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to serialize TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// History retention and dedup
    #[serde(default)]
    pub history: HistoryConfig,

    /// In-memory cache bounds
    #[serde(default)]
    pub cache: CacheConfig,

    /// Display ordering
    #[serde(default)]
    pub sort: SortConfig,

    /// Search behavior
    #[serde(default)]
    pub search: SearchConfig,

    /// Thumbnail and preview rendering
    #[serde(default)]
    pub previews: PreviewsConfig,

    /// Pin alphabet reservations
    #[serde(default)]
    pub pins: PinsConfig,

    /// Title/display options
    #[serde(default)]
    pub display: DisplayConfig,

    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,
}

/// History retention and dedup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of stored items before retention kicks in
    #[serde(default = "default_max_items")]
    pub max_items: u64,

    /// How many recent items the dedup scan inspects
    #[serde(default = "default_dedup_scan_limit")]
    pub dedup_scan_limit: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            dedup_scan_limit: default_dedup_scan_limit(),
        }
    }
}

/// Windowed cache bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Unpinned items fetched by the initial load
    #[serde(default = "default_initial_page")]
    pub initial_page: u64,

    /// Cached entry count past which eviction runs
    #[serde(default = "default_ceiling")]
    pub ceiling: usize,

    /// Entries retained by eviction
    #[serde(default = "default_retain")]
    pub retain: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_page: default_initial_page(),
            ceiling: default_ceiling(),
            retain: default_retain(),
        }
    }
}

/// Display ordering settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SortConfig {
    #[serde(default)]
    pub key: SortKey,

    #[serde(default)]
    pub pin_placement: PinPlacement,
}

/// Search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Quiet period before a query change fires, in milliseconds
    #[serde(default = "default_search_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_search_debounce_ms(),
        }
    }
}

/// Preview rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewsConfig {
    #[serde(default = "default_thumbnail_max_edge")]
    pub thumbnail_max_edge: u32,

    #[serde(default = "default_preview_max_edge")]
    pub preview_max_edge: u32,

    /// Tracked thumbnails beyond this are evicted oldest-first
    #[serde(default = "default_thumbnail_ceiling")]
    pub thumbnail_ceiling: usize,

    /// Delay between selection and the preview render, in
    /// milliseconds
    #[serde(default = "default_preview_debounce_ms")]
    pub debounce_ms: u64,

    /// Debounce once a preview has rendered successfully this session
    #[serde(default = "default_settled_debounce_ms")]
    pub settled_debounce_ms: u64,
}

impl Default for PreviewsConfig {
    fn default() -> Self {
        Self {
            thumbnail_max_edge: default_thumbnail_max_edge(),
            preview_max_edge: default_preview_max_edge(),
            thumbnail_ceiling: default_thumbnail_ceiling(),
            debounce_ms: default_preview_debounce_ms(),
            settled_debounce_ms: default_settled_debounce_ms(),
        }
    }
}

/// Pin alphabet settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinsConfig {
    /// Letters reserved for other global commands
    #[serde(default = "default_reserved_pins")]
    pub reserved: Vec<char>,

    /// Letter bound to the delete-item hotkey, if any
    #[serde(default)]
    pub delete_hotkey: Option<char>,

    /// Letter bound to the pin-toggle hotkey, if any
    #[serde(default)]
    pub pin_hotkey: Option<char>,
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self {
            reserved: default_reserved_pins(),
            delete_hotkey: None,
            pin_hotkey: None,
        }
    }
}

/// Title/display settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisplayConfig {
    /// Render leading/trailing spaces, newlines and tabs as visible
    /// glyphs in generated titles
    #[serde(default)]
    pub visible_whitespace: bool,
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the SQLite history database
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory of the external file cache
    #[serde(default = "default_file_cache_dir")]
    pub file_cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            file_cache_dir: default_file_cache_dir(),
        }
    }
}

fn default_max_items() -> u64 {
    1_000
}

fn default_dedup_scan_limit() -> u64 {
    1_000
}

fn default_initial_page() -> u64 {
    60
}

fn default_ceiling() -> usize {
    150
}

fn default_retain() -> usize {
    100
}

fn default_search_debounce_ms() -> u64 {
    200
}

fn default_thumbnail_max_edge() -> u32 {
    256
}

fn default_preview_max_edge() -> u32 {
    640
}

fn default_thumbnail_ceiling() -> usize {
    99
}

fn default_preview_debounce_ms() -> u64 {
    200
}

fn default_settled_debounce_ms() -> u64 {
    40
}

fn default_reserved_pins() -> Vec<char> {
    vec!['q', 'w']
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("clipkeep")
        .join("history.db")
}

fn default_file_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("clipkeep")
}

impl Config {
    /// Load from the default location, falling back to defaults when
    /// no file exists
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate from an explicit path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to an explicit path
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("clipkeep")
            .join("config.toml")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.retain > self.cache.ceiling {
            return Err(ConfigError::Validation(
                "cache.retain must not exceed cache.ceiling".to_string(),
            ));
        }
        if self.cache.initial_page == 0 {
            return Err(ConfigError::Validation(
                "cache.initial_page must be positive".to_string(),
            ));
        }
        for ch in &self.pins.reserved {
            if !ch.is_ascii_lowercase() {
                return Err(ConfigError::Validation(format!(
                    "reserved pin '{ch}' is not a lowercase letter"
                )));
            }
        }
        Ok(())
    }

    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            initial_page: self.cache.initial_page,
            ceiling: self.cache.ceiling,
            retain: self.cache.retain,
        }
    }

    pub fn sorter(&self) -> Sorter {
        Sorter::new(self.sort.key, self.sort.pin_placement)
    }

    pub fn deduplicator(&self) -> Deduplicator {
        Deduplicator::new(self.history.dedup_scan_limit)
    }

    pub fn retention_limiter(&self) -> RetentionLimiter {
        RetentionLimiter::new(self.history.max_items)
    }

    pub fn pin_manager(&self) -> PinManager {
        PinManager::new(
            self.pins.reserved.clone(),
            self.pins.delete_hotkey,
            self.pins.pin_hotkey,
        )
    }

    pub fn preview_config(&self) -> PreviewConfig {
        PreviewConfig {
            thumbnail_max_edge: self.previews.thumbnail_max_edge,
            preview_max_edge: self.previews.preview_max_edge,
            thumbnail_ceiling: self.previews.thumbnail_ceiling,
            preview_debounce: Duration::from_millis(self.previews.debounce_ms),
            settled_preview_debounce: Duration::from_millis(self.previews.settled_debounce_ms),
        }
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search.debounce_ms)
    }
}
