//! # ClipKeep
//!
//! History engine for a clipboard manager: durable unbounded history,
//! a bounded in-memory window of decorated items, equivalence-based
//! deduplication, ranked search with highlights, single-character
//! pins, retention limits and asynchronous thumbnail/preview
//! rendering with cancellation.
//!
//! The engine is a library; clipboard polling, UI rendering and
//! hotkey registration are external collaborators that drive it
//! through [`engine::HistoryEngine`].

pub mod cache;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod item;
pub mod pins;
pub mod preview;
pub mod retention;
pub mod search;
pub mod sort;
pub mod store;

pub use config::Config;
pub use engine::{Capture, HistoryEngine, HistoryEvent};

/// Result type alias for ClipKeep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ClipKeep operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Durable store error
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
