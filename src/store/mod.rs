//! Durable persistence for history items
//!
//! The engine talks to the store through the [`ItemStore`] trait; the
//! shipped implementation is SQLite-backed. The contract is small on
//! purpose: predicate over pin presence, ordering by last-copy time,
//! offset/limit paging, counting, and transactional bulk delete.

pub mod filecache;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::item::HistoryItem;

pub use filecache::FileCache;
pub use sqlite::SqliteStore;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error creating or opening the store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be mapped back into an item
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Predicate over the pin column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinFilter {
    /// All items
    Any,
    /// Items holding a pin
    Pinned,
    /// Items without a pin
    Unpinned,
}

/// Ordering over last-copy time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOrder {
    LastCopiedAsc,
    LastCopiedDesc,
}

/// Paged fetch request
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn limit(limit: u64) -> Self {
        Self {
            offset: None,
            limit: Some(limit),
        }
    }

    pub fn window(offset: u64, limit: u64) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
        }
    }
}

/// Contract the engine requires from the durable record store
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert an item and its content records in one transaction
    async fn insert(&self, item: &HistoryItem) -> Result<(), StoreError>;

    /// Overwrite an item's metadata and content records
    async fn update(&self, item: &HistoryItem) -> Result<(), StoreError>;

    /// Delete an item; its content records cascade
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Fetch a single item by id
    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<HistoryItem>, StoreError>;

    /// Fetch items matching the pin predicate in the given order
    async fn fetch(
        &self,
        filter: PinFilter,
        order: StoreOrder,
        page: Page,
    ) -> Result<Vec<HistoryItem>, StoreError>;

    /// Count items matching the pin predicate
    async fn count(&self, filter: PinFilter) -> Result<u64, StoreError>;

    /// Transactionally delete every item matching the predicate,
    /// returning the deleted items so callers can release external
    /// resources
    async fn delete_matching(&self, filter: PinFilter) -> Result<Vec<HistoryItem>, StoreError>;

    /// Flush pending writes to disk
    async fn flush(&self) -> Result<(), StoreError>;
}
