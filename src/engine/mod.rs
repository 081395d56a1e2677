//! The history engine: one context object wiring store, cache, dedup,
//! pins, retention and previews together
//!
//! Constructed once at startup and passed around explicitly; there is
//! no global lookup. All cache mutation funnels through the single
//! cache mutex, so no two operations interleave their updates. Every
//! mutating operation emits a [`HistoryEvent`] describing what
//! changed.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::WindowedCache;
use crate::config::Config;
use crate::dedup::{self, Deduplicator, SessionLog};
use crate::item::{ContentRecord, HistoryItem};
use crate::pins::PinManager;
use crate::preview::{
    FrameGrabber, NullFrameGrabber, NullTextRecognizer, PreviewManager, TextRecognizer,
};
use crate::retention::RetentionLimiter;
use crate::search::{Debouncer, SearchHit, SearchProjector};
use crate::store::{FileCache, ItemStore, SqliteStore};

/// A clipboard capture handed to the engine by the poller
#[derive(Debug, Clone)]
pub struct Capture {
    pub contents: Vec<ContentRecord>,
    /// Source application identifier, when known
    pub application: Option<String>,
    /// Arrived through cross-device clipboard sharing
    pub remote: bool,
    /// Pasteboard change counter of the write that produced this
    /// capture; keys the session log
    pub change_counter: Option<i64>,
}

impl Capture {
    pub fn new(contents: Vec<ContentRecord>) -> Self {
        Self {
            contents,
            application: None,
            remote: false,
            change_counter: None,
        }
    }
}

/// Change notification emitted by mutating operations
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    Inserted { ids: Vec<Uuid> },
    Removed { ids: Vec<Uuid> },
    /// A capture merged with an equivalent stored item; the capture's
    /// id survives, the old id is retired
    Merged { surviving: Uuid, retired: Uuid },
    Reordered,
    TitleUpdated { id: Uuid },
    Cleared { including_pinned: bool },
    SearchCompleted { query: String, hits: Vec<SearchHit> },
}

/// The history engine context object
pub struct HistoryEngine {
    config: Config,
    store: Arc<dyn ItemStore>,
    files: Arc<FileCache>,
    cache: Arc<Mutex<WindowedCache>>,
    session_log: Mutex<SessionLog>,
    dedup: Deduplicator,
    pins: PinManager,
    retention: RetentionLimiter,
    previews: Arc<PreviewManager>,
    recognizer: Arc<dyn TextRecognizer>,
    projector: SearchProjector,
    search_debouncer: Debouncer,
    events: broadcast::Sender<HistoryEvent>,
}

impl HistoryEngine {
    /// Wire up an engine from its collaborators
    pub fn new(
        config: Config,
        store: Arc<dyn ItemStore>,
        files: FileCache,
        grabber: Arc<dyn FrameGrabber>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Arc<Self> {
        let cache = Arc::new(Mutex::new(WindowedCache::new(
            config.cache_limits(),
            config.sorter(),
        )));
        let previews = PreviewManager::new(config.preview_config(), Arc::clone(&cache), grabber);
        let (events, _) = broadcast::channel(256);

        Arc::new(Self {
            dedup: config.deduplicator(),
            pins: config.pin_manager(),
            retention: config.retention_limiter(),
            search_debouncer: Debouncer::new(config.search_debounce()),
            config,
            store,
            files: Arc::new(files),
            cache,
            session_log: Mutex::new(SessionLog::new()),
            previews,
            recognizer,
            projector: SearchProjector,
            events,
        })
    }

    /// Open the durable store and file cache from configuration.
    /// Failure to open the store is fatal: the engine cannot run
    /// without it.
    pub async fn open(config: Config) -> anyhow::Result<Arc<Self>> {
        let store = SqliteStore::open(&config.storage.db_path)
            .await
            .with_context(|| {
                format!(
                    "cannot open history store at {}",
                    config.storage.db_path.display()
                )
            })?;
        let files = FileCache::new(&config.storage.file_cache_dir)
            .context("cannot create file cache directory")?;
        info!("history store open at {}", config.storage.db_path.display());
        Ok(Self::new(
            config,
            Arc::new(store),
            files,
            Arc::new(NullFrameGrabber),
            Arc::new(NullTextRecognizer),
        ))
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: HistoryEvent) {
        let _ = self.events.send(event);
    }

    /// Initial load: restore the pin invariant, then materialize the
    /// pinned set plus the most recent page
    pub async fn load(&self) -> Vec<Uuid> {
        match self.pins.deduplicate_pins(&*self.store).await {
            Ok(cleared) => {
                let mut cache = self.cache.lock().await;
                for id in cleared {
                    if let Some(entry) = cache.get_mut(id) {
                        entry.item.pin = None;
                        entry.shortcuts.clear();
                    }
                }
            }
            Err(err) => warn!("pin dedup before load failed: {err}"),
        }

        let mut cache = self.cache.lock().await;
        match cache.load(&*self.store).await {
            Ok(change) => {
                if !change.inserted.is_empty() {
                    self.emit(HistoryEvent::Inserted {
                        ids: change.inserted,
                    });
                }
                self.emit(HistoryEvent::Reordered);
            }
            Err(err) => warn!("history load failed: {err}"),
        }
        cache.visible_ids()
    }

    /// Page further into unpinned history
    pub async fn load_more(&self, offset: u64, limit: u64) -> Vec<Uuid> {
        let mut cache = self.cache.lock().await;
        match cache.load_more(&*self.store, offset, limit).await {
            Ok(change) => {
                for id in &change.removed {
                    self.previews.forget(*id);
                }
                if !change.inserted.is_empty() {
                    self.emit(HistoryEvent::Inserted {
                        ids: change.inserted,
                    });
                }
                if !change.removed.is_empty() {
                    self.emit(HistoryEvent::Removed {
                        ids: change.removed,
                    });
                }
                self.emit(HistoryEvent::Reordered);
            }
            Err(err) => warn!("history page load failed: {err}"),
        }
        cache.visible_ids()
    }

    /// True while unpinned history extends beyond the cache
    pub async fn has_more(&self) -> bool {
        let cache = self.cache.lock().await;
        cache.has_more(&*self.store).await.unwrap_or(false)
    }

    /// Ingest a new copy event. Returns the id of the surviving item:
    /// the capture's own id, kept through any merge.
    pub async fn add(&self, capture: Capture) -> Uuid {
        let mut item = HistoryItem::new(capture.contents, capture.application, capture.remote);
        let generated = item.generate_title(self.config.display.visible_whitespace);
        item.title = generated.title;
        item.title_generation = 1;

        // Dedup against the session log and recent history.
        let matched = {
            let log = self.session_log.lock().await;
            self.dedup
                .find_equivalent(&item, &log, &*self.store)
                .await
        };
        let mut retired = None;
        if let Some(found) = matched {
            dedup::merge(&mut item, &found.item, found.via_session_log);
            if let Err(err) = self.store.delete(found.item.id).await {
                warn!("failed to delete merged duplicate: {err}");
            }
            if self.cache.lock().await.remove(found.item.id).is_some() {
                self.previews.forget(found.item.id);
            }
            self.session_log.lock().await.retire_item(found.item.id);
            retired = Some(found.item.id);
            debug!("merged capture into {} (was {})", item.id, found.item.id);
        }

        if let Err(err) = self.store.insert(&item).await {
            warn!("failed to persist capture: {err}");
        }
        if let Some(counter) = capture.change_counter {
            self.session_log.lock().await.record(counter, item.id);
        }

        // Retention runs after every insert.
        match self.retention.enforce(&*self.store, &self.files).await {
            Ok(deleted) if !deleted.is_empty() => {
                let mut cache = self.cache.lock().await;
                let mut log = self.session_log.lock().await;
                for id in &deleted {
                    cache.remove(*id);
                    self.previews.forget(*id);
                    log.retire_item(*id);
                }
                drop(log);
                drop(cache);
                self.emit(HistoryEvent::Removed { ids: deleted });
            }
            Ok(_) => {}
            Err(err) => warn!("retention enforcement failed: {err}"),
        }

        let change = {
            let mut cache = self.cache.lock().await;
            let mut change = cache.insert(item.clone());
            change.removed = cache.evict_if_needed();
            change
        };
        for id in &change.removed {
            self.previews.forget(*id);
        }
        if !change.removed.is_empty() {
            self.emit(HistoryEvent::Removed {
                ids: change.removed.clone(),
            });
        }
        if let Some(old) = retired {
            self.emit(HistoryEvent::Merged {
                surviving: item.id,
                retired: old,
            });
        }
        if !change.inserted.is_empty() {
            self.emit(HistoryEvent::Inserted {
                ids: change.inserted,
            });
        }
        self.emit(HistoryEvent::Reordered);

        if let Some(bytes) = generated.recognition_source {
            self.spawn_recognition(item.id, item.title_generation, bytes);
        }

        item.id
    }

    fn spawn_recognition(&self, id: Uuid, generation: u64, bytes: Vec<u8>) {
        let recognizer = Arc::clone(&self.recognizer);
        let cache = Arc::clone(&self.cache);
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        tokio::spawn(async move {
            let Some(lines) = recognizer.recognize_lines(&bytes).await else {
                return;
            };
            let title = lines.join("\n");

            // Apply only if no later title write outpaced us.
            let updated = {
                let mut cache = cache.lock().await;
                match cache.get_mut(id) {
                    Some(entry) if entry.item.title_generation == generation => {
                        entry.item.title = title;
                        Some(entry.item.clone())
                    }
                    _ => None,
                }
            };
            if let Some(item) = updated {
                if let Err(err) = store.update(&item).await {
                    warn!("failed to persist recognized title: {err}");
                }
                let _ = events.send(HistoryEvent::TitleUpdated { id });
            }
        });
    }

    /// Overwrite an item's title (a user edit). Bumps the title
    /// generation so stale recognition results are discarded.
    pub async fn set_title(&self, id: Uuid, title: String) {
        let updated = {
            let mut cache = self.cache.lock().await;
            match cache.get_mut(id) {
                Some(entry) => {
                    entry.item.title = title;
                    entry.item.title_generation += 1;
                    Some(entry.item.clone())
                }
                None => None,
            }
        };
        if let Some(item) = updated {
            if let Err(err) = self.store.update(&item).await {
                warn!("failed to persist title: {err}");
            }
            self.emit(HistoryEvent::TitleUpdated { id });
        }
    }

    /// Delete one item: store record, cached entry, rendered images,
    /// external files and session-log entries
    pub async fn delete_item(&self, id: Uuid) {
        let item = {
            let mut cache = self.cache.lock().await;
            cache.remove(id).map(|entry| entry.item)
        };
        let item = match item {
            Some(item) => Some(item),
            None => self.store.fetch_by_id(id).await.unwrap_or_default(),
        };

        if let Err(err) = self.store.delete(id).await {
            warn!("failed to delete item {id}: {err}");
        }
        if let Some(item) = item {
            self.files.delete_item_files(&item);
        }
        self.previews.forget(id);
        self.session_log.lock().await.retire_item(id);
        self.emit(HistoryEvent::Removed { ids: vec![id] });
    }

    /// Delete all unpinned items and their contents atomically,
    /// keeping the pinned set
    pub async fn clear(&self) {
        self.clear_matching(false).await;
    }

    /// Delete everything, pinned items included
    pub async fn clear_all(&self) {
        self.clear_matching(true).await;
    }

    async fn clear_matching(&self, including_pinned: bool) {
        let filter = if including_pinned {
            crate::store::PinFilter::Any
        } else {
            crate::store::PinFilter::Unpinned
        };
        let deleted = match self.store.delete_matching(filter).await {
            Ok(deleted) => deleted,
            Err(err) => {
                warn!("clear failed: {err}");
                return;
            }
        };

        let mut cache = self.cache.lock().await;
        for item in &deleted {
            self.files.delete_item_files(item);
            cache.remove(item.id);
            self.previews.forget(item.id);
        }
        drop(cache);
        self.session_log.lock().await.clear();

        info!("cleared {} items", deleted.len());
        self.emit(HistoryEvent::Cleared { including_pinned });
        self.emit(HistoryEvent::Removed {
            ids: deleted.into_iter().map(|i| i.id).collect(),
        });
    }

    /// Toggle an item's pin, then restore the single-holder invariant
    pub async fn toggle_pin(&self, id: Uuid) -> Option<char> {
        let mut item = {
            let cache = self.cache.lock().await;
            cache.item(id).cloned()
        }?;

        let pin = match self.pins.toggle_pin(&mut item, &*self.store).await {
            Ok(pin) => pin,
            Err(err) => {
                warn!("pin toggle failed for {id}: {err}");
                return None;
            }
        };

        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get_mut(id) {
                entry.item.pin = item.pin;
            }
        }

        match self.pins.deduplicate_pins(&*self.store).await {
            Ok(cleared) => {
                let mut cache = self.cache.lock().await;
                for cleared_id in cleared {
                    if let Some(entry) = cache.get_mut(cleared_id) {
                        entry.item.pin = None;
                        entry.shortcuts.clear();
                    }
                }
            }
            Err(err) => warn!("pin dedup after toggle failed: {err}"),
        }

        self.emit(HistoryEvent::Reordered);
        pin
    }

    /// Mark an item selected and schedule its preview render
    pub async fn select(&self, id: Uuid) {
        {
            let mut cache = self.cache.lock().await;
            let Some(entry) = cache.get_mut(id) else {
                return;
            };
            entry.selected = true;
        }
        self.previews.ensure_preview(id).await;
    }

    /// Deselect an item, cancelling any in-flight render immediately
    pub async fn deselect(&self, id: Uuid) {
        self.previews.cancel_renders(id);
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get_mut(id) {
            entry.selected = false;
        }
    }

    /// Schedule a thumbnail render for a visible item
    pub async fn ensure_thumbnail(&self, id: Uuid) {
        self.previews.ensure_thumbnail(id).await;
    }

    /// Debounced query entry point: only the most recent query after
    /// the quiet period fires a projection (or a reset for the empty
    /// query)
    pub fn set_query(self: &Arc<Self>, query: impl Into<String>) {
        let query = query.into();
        let generation = self.search_debouncer.begin();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if !engine.search_debouncer.settle(generation).await {
                return;
            }
            if query.is_empty() {
                engine.reset_search().await;
            } else {
                engine.search(&query).await;
            }
        });
    }

    /// Run a search projection immediately
    pub async fn search(&self, query: &str) -> Vec<SearchHit> {
        let outcome = {
            let mut cache = self.cache.lock().await;
            match self.projector.project(query, &*self.store, &mut cache).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!("search failed: {err}");
                    return Vec::new();
                }
            }
        };
        for id in &outcome.evicted {
            self.previews.forget(*id);
        }
        self.emit(HistoryEvent::SearchCompleted {
            query: query.to_string(),
            hits: outcome.hits.clone(),
        });
        outcome.hits
    }

    /// Return to the recent view after the query was cleared
    pub async fn reset_search(&self) {
        let mut cache = self.cache.lock().await;
        match cache.reset_to_recent(&*self.store).await {
            Ok(change) => {
                if !change.inserted.is_empty() {
                    self.emit(HistoryEvent::Inserted {
                        ids: change.inserted,
                    });
                }
                self.emit(HistoryEvent::Reordered);
            }
            Err(err) => warn!("search reset failed: {err}"),
        }
    }

    /// Ids currently visible, in display order
    pub async fn visible_ids(&self) -> Vec<Uuid> {
        self.cache.lock().await.visible_ids()
    }

    /// Snapshots of the currently visible items, in display order
    pub async fn visible_items(&self) -> Vec<HistoryItem> {
        let cache = self.cache.lock().await;
        cache
            .visible_ids()
            .into_iter()
            .filter_map(|id| cache.item(id).cloned())
            .collect()
    }

    /// Snapshot of one cached item
    pub async fn item(&self, id: Uuid) -> Option<HistoryItem> {
        self.cache.lock().await.item(id).cloned()
    }

    /// The preview manager, for UI-side render scheduling
    pub fn previews(&self) -> &Arc<PreviewManager> {
        &self.previews
    }

    /// Flush pending store writes
    pub async fn flush(&self) {
        if let Err(err) = self.store.flush().await {
            warn!("store flush failed: {err}");
        }
    }
}
