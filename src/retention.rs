//! Total-size retention policy
//!
//! Runs after every insert. When the store exceeds the configured
//! maximum, the oldest unpinned image/file items are deleted until the
//! count is back within budget. Text-only items are exempt and survive
//! regardless of age; pinned items are never touched.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::{FileCache, ItemStore, Page, PinFilter, StoreError, StoreOrder};

/// Oldest-first deletion down to a configured maximum
#[derive(Debug, Clone, Copy)]
pub struct RetentionLimiter {
    max_items: u64,
}

impl RetentionLimiter {
    pub fn new(max_items: u64) -> Self {
        Self { max_items }
    }

    pub fn max_items(&self) -> u64 {
        self.max_items
    }

    /// Bring the store back within budget. Returns the ids of deleted
    /// items so the caller can evict them from the cache. Store
    /// failures degrade to a no-op.
    pub async fn enforce(
        &self,
        store: &dyn ItemStore,
        files: &FileCache,
    ) -> Result<Vec<Uuid>, StoreError> {
        let total = store.count(PinFilter::Any).await?;
        if total <= self.max_items {
            return Ok(Vec::new());
        }
        let mut excess = total - self.max_items;

        let candidates = store
            .fetch(PinFilter::Unpinned, StoreOrder::LastCopiedAsc, Page::all())
            .await?;

        let mut deleted = Vec::new();
        for item in candidates {
            if excess == 0 {
                break;
            }
            if item.is_text_only() {
                continue;
            }
            if let Err(err) = store.delete(item.id).await {
                warn!("retention delete failed for {}: {err}", item.id);
                continue;
            }
            files.delete_item_files(&item);
            deleted.push(item.id);
            excess -= 1;
        }

        if !deleted.is_empty() {
            debug!("retention deleted {} items", deleted.len());
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ContentKind, ContentRecord, HistoryItem};
    use crate::store::SqliteStore;
    use chrono::Duration;
    use tempfile::TempDir;

    fn aged(mut item: HistoryItem, age_secs: i64) -> HistoryItem {
        item.last_copied_at = item.last_copied_at - Duration::seconds(age_secs);
        item.first_copied_at = item.last_copied_at;
        item
    }

    fn image_item(age_secs: i64) -> HistoryItem {
        aged(
            HistoryItem::new(
                vec![ContentRecord::inline(ContentKind::ImagePng, vec![1, 2, 3])],
                None,
                false,
            ),
            age_secs,
        )
    }

    fn text_item(text: &str, age_secs: i64) -> HistoryItem {
        aged(
            HistoryItem::new(
                vec![ContentRecord::inline(ContentKind::PlainText, text)],
                None,
                false,
            ),
            age_secs,
        )
    }

    async fn fixture() -> (SqliteStore, FileCache, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open_in_memory().await.unwrap();
        let files = FileCache::new(dir.path().join("cache")).unwrap();
        (store, files, dir)
    }

    #[tokio::test]
    async fn test_within_budget_is_noop() {
        let (store, files, _dir) = fixture().await;
        for i in 0..5 {
            store.insert(&image_item(i)).await.unwrap();
        }
        let deleted = RetentionLimiter::new(10)
            .enforce(&store, &files)
            .await
            .unwrap();
        assert!(deleted.is_empty());
        assert_eq!(store.count(PinFilter::Any).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_text_items_are_exempt() {
        let (store, files, _dir) = fixture().await;

        // 100 image items plus one ancient text item, budget 100.
        let text = text_item("survivor", 1_000_000);
        store.insert(&text).await.unwrap();
        let mut oldest_image = None;
        for i in 0..100 {
            let item = image_item(100 - i);
            if i == 0 {
                oldest_image = Some(item.id);
            }
            store.insert(&item).await.unwrap();
        }

        let deleted = RetentionLimiter::new(100)
            .enforce(&store, &files)
            .await
            .unwrap();

        // Exactly one deletion: the oldest image, never the text.
        assert_eq!(deleted, vec![oldest_image.unwrap()]);
        assert!(store.fetch_by_id(text.id).await.unwrap().is_some());
        assert_eq!(store.count(PinFilter::Any).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_pinned_items_are_never_deleted() {
        let (store, files, _dir) = fixture().await;

        let mut pinned = image_item(1_000_000);
        pinned.pin = Some('a');
        store.insert(&pinned).await.unwrap();
        for i in 0..4 {
            store.insert(&image_item(i)).await.unwrap();
        }

        let deleted = RetentionLimiter::new(3)
            .enforce(&store, &files)
            .await
            .unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(store.fetch_by_id(pinned.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deletes_oldest_first_until_within_budget() {
        let (store, files, _dir) = fixture().await;
        let mut ids = Vec::new();
        for i in 0..10 {
            // i = 0 newest, i = 9 oldest.
            let item = image_item(i);
            ids.push(item.id);
            store.insert(&item).await.unwrap();
        }

        let deleted = RetentionLimiter::new(7)
            .enforce(&store, &files)
            .await
            .unwrap();
        assert_eq!(deleted.len(), 3);
        // Oldest three go, in oldest-first order.
        assert_eq!(deleted, vec![ids[9], ids[8], ids[7]]);
    }

    #[tokio::test]
    async fn test_deletes_external_files() {
        let (store, files, _dir) = fixture().await;

        let path = files.store("images", "png", b"payload").unwrap();
        let old = aged(
            HistoryItem::new(
                vec![ContentRecord::external(ContentKind::ImagePng, &path)],
                None,
                false,
            ),
            100,
        );
        store.insert(&old).await.unwrap();
        store.insert(&image_item(1)).await.unwrap();

        RetentionLimiter::new(1)
            .enforce(&store, &files)
            .await
            .unwrap();
        assert!(!path.exists());
    }
}
