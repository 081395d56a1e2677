//! Bounded in-memory window over the durable history
//!
//! The cache owns one decorated item per materialized history item,
//! keyed by id. The durable store may hold an unbounded number of
//! items; the cache holds the pinned set plus a paged window of
//! unpinned ones, and evicts past a ceiling. Every mutating operation
//! returns a [`CacheChange`] describing what a consumer must refresh.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use tracing::debug;
use uuid::Uuid;

use crate::item::HistoryItem;
use crate::sort::Sorter;
use crate::store::{ItemStore, Page, PinFilter, StoreError, StoreOrder};

/// A rendered bitmap held by a decorated item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub width: u32,
    pub height: u32,
    /// PNG-encoded pixels
    pub data: Vec<u8>,
}

/// Transient UI-facing wrapper around one cached history item.
/// Never persisted; destroyed on eviction or deletion.
#[derive(Debug)]
pub struct DecoratedItem {
    pub item: HistoryItem,
    pub shortcuts: Vec<String>,
    pub selected: bool,
    pub visible: bool,
    pub thumbnail: Option<RenderedImage>,
    pub preview: Option<RenderedImage>,
    /// Char-index ranges into `item.title` highlighted by search
    pub highlights: Vec<Range<usize>>,
}

impl DecoratedItem {
    pub fn new(item: HistoryItem) -> Self {
        Self {
            item,
            shortcuts: Vec::new(),
            selected: false,
            visible: false,
            thumbnail: None,
            preview: None,
            highlights: Vec::new(),
        }
    }

    /// Drop both rendered images
    pub fn release_images(&mut self) {
        self.thumbnail = None;
        self.preview = None;
    }
}

/// Description of a cache mutation, for change subscribers
#[derive(Debug, Clone, Default)]
pub struct CacheChange {
    pub inserted: Vec<Uuid>,
    pub removed: Vec<Uuid>,
    pub reordered: bool,
}

impl CacheChange {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty() && !self.reordered
    }
}

/// Size bounds of the cache
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    /// Unpinned items fetched by the initial load (window size)
    pub initial_page: u64,
    /// Entry count past which eviction runs
    pub ceiling: usize,
    /// Total entries retained by eviction (pinned count is carved out
    /// of this)
    pub retain: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            initial_page: 60,
            ceiling: 150,
            retain: 100,
        }
    }
}

/// Bounded cache of decorated items backed by the durable store
pub struct WindowedCache {
    entries: HashMap<Uuid, DecoratedItem>,
    /// Offsets of the visible unpinned range
    window: Range<u64>,
    limits: CacheLimits,
    sorter: Sorter,
}

impl WindowedCache {
    pub fn new(limits: CacheLimits, sorter: Sorter) -> Self {
        Self {
            entries: HashMap::new(),
            window: 0..0,
            limits,
            sorter,
        }
    }

    pub fn sorter(&self) -> Sorter {
        self.sorter
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&DecoratedItem> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut DecoratedItem> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn cached_unpinned(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.item.pin.is_none())
            .count()
    }

    pub fn cached_pinned(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.item.pin.is_some())
            .count()
    }

    /// Initial load: all pinned items plus the most recent page of
    /// unpinned ones. Existing decorations survive for items already
    /// cached.
    pub async fn load(&mut self, store: &dyn ItemStore) -> Result<CacheChange, StoreError> {
        let pinned = store
            .fetch(PinFilter::Pinned, StoreOrder::LastCopiedDesc, Page::all())
            .await?;
        let unpinned = store
            .fetch(
                PinFilter::Unpinned,
                StoreOrder::LastCopiedDesc,
                Page::limit(self.limits.initial_page),
            )
            .await?;

        let fetched_unpinned = unpinned.len() as u64;
        let mut change = CacheChange {
            reordered: true,
            ..Default::default()
        };
        for item in pinned.into_iter().chain(unpinned) {
            let id = item.id;
            if self.absorb(item) {
                change.inserted.push(id);
            }
        }
        self.window = 0..fetched_unpinned.min(self.limits.initial_page);
        debug!(
            "cache loaded: {} entries, window {:?}",
            self.entries.len(),
            self.window
        );
        Ok(change)
    }

    /// Fetch and materialize the next unpinned page, then evict if
    /// the cache outgrew its ceiling.
    pub async fn load_more(
        &mut self,
        store: &dyn ItemStore,
        offset: u64,
        limit: u64,
    ) -> Result<CacheChange, StoreError> {
        let page = store
            .fetch(
                PinFilter::Unpinned,
                StoreOrder::LastCopiedDesc,
                Page::window(offset, limit),
            )
            .await?;
        let total = store.count(PinFilter::Unpinned).await?;

        let mut change = CacheChange {
            reordered: true,
            ..Default::default()
        };
        for item in page {
            let id = item.id;
            if self.absorb(item) {
                change.inserted.push(id);
            }
        }
        self.window = offset..(offset + limit).min(total);

        change.removed = self.evict_if_needed();
        Ok(change)
    }

    /// Run eviction when the cache outgrew its ceiling
    pub fn evict_if_needed(&mut self) -> Vec<Uuid> {
        if self.entries.len() > self.limits.ceiling {
            self.evict()
        } else {
            Vec::new()
        }
    }

    /// Merge one item into the cache; true when it was newly
    /// materialized rather than refreshed
    fn absorb(&mut self, item: HistoryItem) -> bool {
        match self.entries.get_mut(&item.id) {
            Some(entry) => {
                entry.item = item;
                false
            }
            None => {
                self.entries.insert(item.id, DecoratedItem::new(item));
                true
            }
        }
    }

    /// Materialize a freshly captured item. While the view is
    /// anchored at the top, the visible window grows to keep the new
    /// item on screen.
    pub fn insert(&mut self, item: HistoryItem) -> CacheChange {
        let id = item.id;
        let unpinned = item.pin.is_none();
        let inserted = self.absorb(item);
        if inserted && unpinned && self.window.start == 0 {
            self.window.end += 1;
        }
        CacheChange {
            inserted: if inserted { vec![id] } else { Vec::new() },
            removed: Vec::new(),
            reordered: true,
        }
    }

    /// Remove one entry, returning it so the caller can release its
    /// resources
    pub fn remove(&mut self, id: Uuid) -> Option<DecoratedItem> {
        self.entries.remove(&id)
    }

    /// True while the store holds unpinned items the cache has not
    /// materialized
    pub async fn has_more(&self, store: &dyn ItemStore) -> Result<bool, StoreError> {
        let total = store.count(PinFilter::Unpinned).await?;
        Ok((self.cached_unpinned() as u64) < total)
    }

    /// Ids in display order: every pinned entry plus the visible
    /// unpinned window, ordered by the sorter
    pub fn visible_ids(&self) -> Vec<Uuid> {
        let mut unpinned: Vec<&HistoryItem> = self
            .entries
            .values()
            .map(|e| &e.item)
            .filter(|i| i.pin.is_none())
            .collect();
        unpinned.sort_by(|a, b| self.sorter.compare(a, b));

        let start = (self.window.start as usize).min(unpinned.len());
        let end = (self.window.end as usize).min(unpinned.len());

        let mut visible: Vec<&HistoryItem> = self
            .entries
            .values()
            .map(|e| &e.item)
            .filter(|i| i.pin.is_some())
            .collect();
        visible.extend(unpinned[start..end].iter().copied());
        visible.sort_by(|a, b| self.sorter.compare(a, b));
        visible.iter().map(|i| i.id).collect()
    }

    /// Evict down to the retention bound: every pinned entry stays,
    /// unpinned entries beyond the most recent `retain - pinned` go.
    /// Returns the evicted ids; their images are released before
    /// removal.
    pub fn evict(&mut self) -> Vec<Uuid> {
        let pinned_count = self.cached_pinned();
        let keep = self.limits.retain.saturating_sub(pinned_count);

        let mut unpinned: Vec<&HistoryItem> = self
            .entries
            .values()
            .map(|e| &e.item)
            .filter(|i| i.pin.is_none())
            .collect();
        unpinned.sort_by(|a, b| self.sorter.compare(a, b));

        let doomed: Vec<Uuid> = unpinned.iter().skip(keep).map(|i| i.id).collect();
        for id in &doomed {
            if let Some(mut entry) = self.entries.remove(id) {
                entry.release_images();
            }
        }
        if !doomed.is_empty() {
            debug!("cache evicted {} entries", doomed.len());
        }
        doomed
    }

    /// Post-search retention: keep pinned entries, matched entries,
    /// and the most recent `initial_page` unpinned entries. Returns
    /// the evicted ids.
    pub fn retain_for_search(&mut self, matched: &HashSet<Uuid>) -> Vec<Uuid> {
        let mut unpinned: Vec<&HistoryItem> = self
            .entries
            .values()
            .map(|e| &e.item)
            .filter(|i| i.pin.is_none())
            .collect();
        unpinned.sort_by(|a, b| self.sorter.compare(a, b));

        let recent: HashSet<Uuid> = unpinned
            .iter()
            .take(self.limits.initial_page as usize)
            .map(|i| i.id)
            .collect();

        let doomed: Vec<Uuid> = self
            .entries
            .values()
            .filter(|e| {
                e.item.pin.is_none() && !matched.contains(&e.item.id) && !recent.contains(&e.item.id)
            })
            .map(|e| e.item.id)
            .collect();
        for id in &doomed {
            if let Some(mut entry) = self.entries.remove(id) {
                entry.release_images();
            }
        }
        doomed
    }

    /// Empty-query reset: re-derive the recent view from cache when
    /// enough unpinned entries are already materialized, otherwise
    /// fall back to a fresh load (eviction may have discarded items
    /// that are needed again).
    pub async fn reset_to_recent(
        &mut self,
        store: &dyn ItemStore,
    ) -> Result<CacheChange, StoreError> {
        if (self.cached_unpinned() as u64) >= self.limits.initial_page {
            self.window = 0..self.limits.initial_page;
            self.clear_highlights();
            return Ok(CacheChange {
                reordered: true,
                ..Default::default()
            });
        }
        self.load(store).await
    }

    /// Drop search highlights on every entry
    pub fn clear_highlights(&mut self) {
        for entry in self.entries.values_mut() {
            entry.highlights.clear();
        }
    }

    /// Snapshot of an item for read-only consumers
    pub fn item(&self, id: Uuid) -> Option<&HistoryItem> {
        self.entries.get(&id).map(|e| &e.item)
    }

    /// Iterate all cached entries
    pub fn iter(&self) -> impl Iterator<Item = &DecoratedItem> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ContentKind, ContentRecord};
    use crate::store::SqliteStore;
    use chrono::Duration;

    fn text_item(text: &str, age_secs: i64) -> HistoryItem {
        let mut item = HistoryItem::new(
            vec![ContentRecord::inline(ContentKind::PlainText, text)],
            None,
            false,
        );
        item.last_copied_at = item.last_copied_at - Duration::seconds(age_secs);
        item.first_copied_at = item.last_copied_at;
        item
    }

    async fn seeded_store(unpinned: usize, pinned: usize) -> SqliteStore {
        let store = SqliteStore::open_in_memory().await.unwrap();
        for i in 0..unpinned {
            // Older items have larger ages.
            store
                .insert(&text_item(&format!("item {i}"), i as i64))
                .await
                .unwrap();
        }
        for i in 0..pinned {
            let mut item = text_item(&format!("pinned {i}"), 10_000 + i as i64);
            item.pin = Some(char::from(b'a' + i as u8));
            store.insert(&item).await.unwrap();
        }
        store
    }

    fn small_limits() -> CacheLimits {
        CacheLimits {
            initial_page: 10,
            ceiling: 25,
            retain: 15,
        }
    }

    #[tokio::test]
    async fn test_load_window_invariant() {
        let store = seeded_store(40, 3).await;
        let mut cache = WindowedCache::new(small_limits(), Sorter::default());

        let change = cache.load(&store).await.unwrap();
        assert_eq!(change.inserted.len(), 13); // 10 unpinned + 3 pinned
        assert!(change.reordered);

        assert_eq!(cache.cached_pinned(), 3);
        assert_eq!(cache.cached_unpinned(), 10);
        assert!(cache.has_more(&store).await.unwrap());

        // Pinned-first ordering, then most recent unpinned.
        let visible = cache.visible_ids();
        assert_eq!(visible.len(), 13);
        let first_unpinned = cache.item(visible[3]).unwrap();
        assert_eq!(first_unpinned.derive_text(), Some("item 0".to_string()));
    }

    #[tokio::test]
    async fn test_load_more_extends_union_of_windows() {
        let store = seeded_store(40, 0).await;
        let mut cache = WindowedCache::new(small_limits(), Sorter::default());

        cache.load(&store).await.unwrap();
        let change = cache.load_more(&store, 10, 10).await.unwrap();
        assert_eq!(change.inserted.len(), 10);

        // The union of both requested windows is materialized.
        assert_eq!(cache.cached_unpinned(), 20);
        assert!(cache.has_more(&store).await.unwrap());

        let visible = cache.visible_ids();
        assert_eq!(visible.len(), 10);
        assert_eq!(
            cache.item(visible[0]).unwrap().derive_text(),
            Some("item 10".to_string())
        );
    }

    #[tokio::test]
    async fn test_has_more_false_when_everything_cached() {
        let store = seeded_store(8, 1).await;
        let mut cache = WindowedCache::new(small_limits(), Sorter::default());

        cache.load(&store).await.unwrap();
        assert!(!cache.has_more(&store).await.unwrap());
    }

    #[tokio::test]
    async fn test_eviction_bound_and_recency() {
        let store = seeded_store(40, 2).await;
        let mut cache = WindowedCache::new(small_limits(), Sorter::default());

        cache.load(&store).await.unwrap();
        cache.load_more(&store, 10, 10).await.unwrap();
        let change = cache.load_more(&store, 20, 10).await.unwrap();

        // 30 unpinned + 2 pinned exceeded the ceiling of 25 and
        // eviction trimmed back to the retention bound.
        assert!(!change.removed.is_empty());
        assert!(cache.len() <= small_limits().retain);
        assert_eq!(cache.cached_pinned(), 2);

        // Retained unpinned entries are exactly the most recent ones.
        let mut texts: Vec<String> = cache
            .iter()
            .filter(|e| e.item.pin.is_none())
            .map(|e| e.item.derive_text().unwrap())
            .collect();
        texts.sort_by_key(|t| t[5..].parse::<u32>().unwrap());
        let expected: Vec<String> = (0..13).map(|i| format!("item {i}")).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn test_eviction_releases_images() {
        let store = seeded_store(40, 0).await;
        let mut cache = WindowedCache::new(small_limits(), Sorter::default());
        cache.load(&store).await.unwrap();
        // 20 entries: below the ceiling, above the retention bound.
        cache.load_more(&store, 10, 10).await.unwrap();

        for entry in cache.entries.values_mut() {
            entry.thumbnail = Some(RenderedImage {
                width: 1,
                height: 1,
                data: vec![0],
            });
        }
        let evicted = cache.evict();
        assert!(!evicted.is_empty());
        for id in evicted {
            assert!(cache.get(id).is_none());
        }
    }

    #[tokio::test]
    async fn test_reset_to_recent_reloads_after_eviction() {
        let store = seeded_store(40, 0).await;
        let mut cache = WindowedCache::new(small_limits(), Sorter::default());
        cache.load(&store).await.unwrap();

        // Simulate deep scrolling followed by heavy eviction.
        cache.load_more(&store, 10, 20).await.unwrap();
        let ids: Vec<Uuid> = cache.entries.keys().copied().collect();
        for id in ids.iter().take(cache.len() - 4) {
            cache.remove(*id);
        }
        assert!((cache.cached_unpinned() as u64) < small_limits().initial_page);

        let change = cache.reset_to_recent(&store).await.unwrap();
        assert!(change.reordered);
        assert_eq!(cache.visible_ids().len(), 10);
    }

    #[tokio::test]
    async fn test_reset_to_recent_uses_cache_when_possible() {
        let store = seeded_store(20, 0).await;
        let mut cache = WindowedCache::new(small_limits(), Sorter::default());
        cache.load(&store).await.unwrap();
        cache.load_more(&store, 10, 10).await.unwrap();

        let before = cache.len();
        let change = cache.reset_to_recent(&store).await.unwrap();
        assert!(change.inserted.is_empty());
        assert_eq!(cache.len(), before);
        assert_eq!(cache.visible_ids().len(), 10);
    }

    #[tokio::test]
    async fn test_retain_for_search() {
        let store = seeded_store(30, 1).await;
        let mut cache = WindowedCache::new(
            CacheLimits {
                initial_page: 5,
                ceiling: 100,
                retain: 100,
            },
            Sorter::default(),
        );
        cache.load(&store).await.unwrap();
        cache.load_more(&store, 5, 25).await.unwrap();
        assert_eq!(cache.cached_unpinned(), 30);

        // Pretend the two oldest items matched a search.
        let mut unpinned: Vec<&HistoryItem> = cache
            .entries
            .values()
            .map(|e| &e.item)
            .filter(|i| i.pin.is_none())
            .collect();
        unpinned.sort_by(|a, b| Sorter::default().compare(a, b));
        let matched: HashSet<Uuid> = unpinned.iter().rev().take(2).map(|i| i.id).collect();

        let evicted = cache.retain_for_search(&matched);
        assert_eq!(cache.cached_pinned(), 1);
        // 5 recent + 2 matched survive.
        assert_eq!(cache.cached_unpinned(), 7);
        assert_eq!(evicted.len(), 23);
        for id in matched {
            assert!(cache.contains(id));
        }
    }
}
