//! Asynchronous thumbnail and preview rendering
//!
//! One background task per (item, kind) renders a scaled bitmap into
//! the decorated item. Requests are idempotent while a task is in
//! flight; deselecting or evicting an item cancels its task, and a
//! result that arrives after cancellation is discarded. A recency
//! tracker bounds how many generated thumbnails stay cached.

pub mod render;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::cache::{RenderedImage, WindowedCache};
use crate::item::HistoryItem;

pub use render::{FrameGrabber, NullFrameGrabber, NullTextRecognizer, TextRecognizer};

/// Which rendered bitmap a task produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderKind {
    Thumbnail,
    Preview,
}

/// Rendering limits and delays
#[derive(Debug, Clone, Copy)]
pub struct PreviewConfig {
    pub thumbnail_max_edge: u32,
    pub preview_max_edge: u32,
    /// Tracked thumbnails beyond this are evicted oldest-first
    pub thumbnail_ceiling: usize,
    /// Delay between selection and the preview render
    pub preview_debounce: Duration,
    /// Debounce used after the first successful preview of a session
    pub settled_preview_debounce: Duration,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            thumbnail_max_edge: 256,
            preview_max_edge: 640,
            thumbnail_ceiling: 99,
            preview_debounce: Duration::from_millis(200),
            settled_preview_debounce: Duration::from_millis(40),
        }
    }
}

/// Recency bookkeeping for generated thumbnails
#[derive(Debug, Default)]
struct ThumbnailTracker {
    seq: u64,
    entries: HashMap<Uuid, u64>,
}

impl ThumbnailTracker {
    fn track(&mut self, id: Uuid) {
        self.seq += 1;
        self.entries.insert(id, self.seq);
    }

    fn untrack(&mut self, id: Uuid) {
        self.entries.remove(&id);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Remove and return the oldest-generated ids beyond the ceiling
    fn overflow(&mut self, ceiling: usize) -> Vec<Uuid> {
        if self.entries.len() <= ceiling {
            return Vec::new();
        }
        let mut by_age: Vec<(Uuid, u64)> = self.entries.iter().map(|(k, v)| (*k, *v)).collect();
        by_age.sort_by_key(|(_, seq)| *seq);
        let doomed: Vec<Uuid> = by_age
            .iter()
            .take(self.entries.len() - ceiling)
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            self.entries.remove(id);
        }
        doomed
    }
}

/// Renders and bounds thumbnails and previews for cached items
pub struct PreviewManager {
    config: PreviewConfig,
    cache: Arc<Mutex<WindowedCache>>,
    grabber: Arc<dyn FrameGrabber>,
    tasks: StdMutex<HashMap<(Uuid, RenderKind), (u64, CancellationToken)>>,
    next_task: AtomicU64,
    tracker: StdMutex<ThumbnailTracker>,
    preview_succeeded: AtomicBool,
}

impl PreviewManager {
    pub fn new(
        config: PreviewConfig,
        cache: Arc<Mutex<WindowedCache>>,
        grabber: Arc<dyn FrameGrabber>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            cache,
            grabber,
            tasks: StdMutex::new(HashMap::new()),
            next_task: AtomicU64::new(0),
            tracker: StdMutex::new(ThumbnailTracker::default()),
            preview_succeeded: AtomicBool::new(false),
        })
    }

    /// Number of thumbnails currently tracked
    pub fn tracked_thumbnails(&self) -> usize {
        self.tracker.lock().unwrap().len()
    }

    /// True while a render task for (item, kind) is in flight
    pub fn in_flight(&self, id: Uuid, kind: RenderKind) -> bool {
        self.tasks.lock().unwrap().contains_key(&(id, kind))
    }

    /// Start a thumbnail render unless one is cached or in flight
    pub async fn ensure_thumbnail(self: &Arc<Self>, id: Uuid) {
        self.ensure(id, RenderKind::Thumbnail, Duration::ZERO).await;
    }

    /// Start a preview render after the selection debounce unless one
    /// is cached or in flight
    pub async fn ensure_preview(self: &Arc<Self>, id: Uuid) {
        let delay = if self.preview_succeeded.load(Ordering::Relaxed) {
            self.config.settled_preview_debounce
        } else {
            self.config.preview_debounce
        };
        self.ensure(id, RenderKind::Preview, delay).await;
    }

    async fn ensure(self: &Arc<Self>, id: Uuid, kind: RenderKind, delay: Duration) {
        {
            let cache = self.cache.lock().await;
            let Some(entry) = cache.get(id) else {
                return;
            };
            if !entry.item.has_renderable_image() {
                return;
            }
            let cached = match kind {
                RenderKind::Thumbnail => entry.thumbnail.is_some(),
                RenderKind::Preview => entry.preview.is_some(),
            };
            if cached {
                return;
            }
        }

        let (task_seq, token) = {
            let mut tasks = self.tasks.lock().unwrap();
            if tasks.contains_key(&(id, kind)) {
                return;
            }
            let seq = self.next_task.fetch_add(1, Ordering::Relaxed);
            let token = CancellationToken::new();
            tasks.insert((id, kind), (seq, token.clone()));
            (seq, token)
        };

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_render(id, kind, delay, task_seq, token).await;
        });
    }

    async fn run_render(
        self: Arc<Self>,
        id: Uuid,
        kind: RenderKind,
        delay: Duration,
        task_seq: u64,
        token: CancellationToken,
    ) {
        if !delay.is_zero() {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let item = {
            let cache = self.cache.lock().await;
            match cache.get(id) {
                Some(entry) => entry.item.clone(),
                None => {
                    self.finish_task(id, kind, task_seq);
                    return;
                }
            }
        };
        if token.is_cancelled() {
            return;
        }

        let rendered = self.render(&item, kind).await;

        if let Some(image) = rendered {
            let mut cache = self.cache.lock().await;
            // A result arriving after cancellation is discarded,
            // never applied.
            if token.is_cancelled() {
                return;
            }
            if let Some(entry) = cache.get_mut(id) {
                match kind {
                    RenderKind::Thumbnail => entry.thumbnail = Some(image),
                    RenderKind::Preview => {
                        entry.preview = Some(image);
                        self.preview_succeeded.store(true, Ordering::Relaxed);
                    }
                }
            }
            drop(cache);

            if kind == RenderKind::Thumbnail {
                self.track_thumbnail(id);
            }
        } else if token.is_cancelled() {
            return;
        }

        self.finish_task(id, kind, task_seq);
    }

    async fn render(&self, item: &HistoryItem, kind: RenderKind) -> Option<RenderedImage> {
        let max_edge = match kind {
            RenderKind::Thumbnail => self.config.thumbnail_max_edge,
            RenderKind::Preview => self.config.preview_max_edge,
        };

        if let Some(video) = item.video_file_path() {
            let frame = self.grabber.frame_at_start(&video).await?;
            return tokio::task::spawn_blocking(move || render::scale_to_fit(&frame, max_edge))
                .await
                .ok()
                .flatten();
        }

        // File reads fail silently under sandbox permission denials;
        // image_bytes already folds that into "no image".
        let bytes = item.image_bytes()?;
        tokio::task::spawn_blocking(move || render::decode_and_scale(&bytes, max_edge))
            .await
            .ok()
            .flatten()
    }

    fn track_thumbnail(self: &Arc<Self>, id: Uuid) {
        let doomed = {
            let mut tracker = self.tracker.lock().unwrap();
            tracker.track(id);
            tracker.overflow(self.config.thumbnail_ceiling)
        };
        if doomed.is_empty() {
            return;
        }

        // Evict asynchronously so the triggering render never blocks
        // on old entries.
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut cache = manager.cache.lock().await;
            for id in &doomed {
                if let Some(entry) = cache.get_mut(*id) {
                    entry.thumbnail = None;
                }
            }
            debug!("evicted {} old thumbnails", doomed.len());
        });
    }

    /// Remove the task entry, but only if it still belongs to this
    /// task; a cancelled task must not unregister its replacement.
    fn finish_task(&self, id: Uuid, kind: RenderKind, task_seq: u64) {
        let mut tasks = self.tasks.lock().unwrap();
        if tasks.get(&(id, kind)).is_some_and(|(seq, _)| *seq == task_seq) {
            tasks.remove(&(id, kind));
        }
    }

    /// Cancel any in-flight render for the item, release both cached
    /// images and untrack its thumbnail
    pub async fn cleanup_images(&self, id: Uuid) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            for kind in [RenderKind::Thumbnail, RenderKind::Preview] {
                if let Some((_, token)) = tasks.remove(&(id, kind)) {
                    token.cancel();
                }
            }
        }
        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get_mut(id) {
                entry.release_images();
            }
        }
        self.tracker.lock().unwrap().untrack(id);
    }

    /// Cancel any in-flight render for the item without releasing
    /// images already cached; for deselection
    pub fn cancel_renders(&self, id: Uuid) {
        let mut tasks = self.tasks.lock().unwrap();
        for kind in [RenderKind::Thumbnail, RenderKind::Preview] {
            if let Some((_, token)) = tasks.remove(&(id, kind)) {
                token.cancel();
            }
        }
    }

    /// Cancel in-flight renders and untrack without touching the
    /// cache; for items that were already evicted
    pub fn forget(&self, id: Uuid) {
        let mut tasks = self.tasks.lock().unwrap();
        for kind in [RenderKind::Thumbnail, RenderKind::Preview] {
            if let Some((_, token)) = tasks.remove(&(id, kind)) {
                token.cancel();
            }
        }
        drop(tasks);
        self.tracker.lock().unwrap().untrack(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheLimits, DecoratedItem};
    use crate::item::{ContentKind, ContentRecord};
    use crate::sort::Sorter;
    use async_trait::async_trait;
    use std::path::Path;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::new(width, height);
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn image_item() -> HistoryItem {
        HistoryItem::new(
            vec![ContentRecord::inline(ContentKind::ImagePng, png_bytes(32, 16))],
            None,
            false,
        )
    }

    fn text_item() -> HistoryItem {
        HistoryItem::new(
            vec![ContentRecord::inline(ContentKind::PlainText, "words")],
            None,
            false,
        )
    }

    async fn cache_with(items: Vec<HistoryItem>) -> Arc<Mutex<WindowedCache>> {
        let mut cache = WindowedCache::new(CacheLimits::default(), Sorter::default());
        for item in items {
            cache.insert(item);
        }
        Arc::new(Mutex::new(cache))
    }

    fn manager(cache: Arc<Mutex<WindowedCache>>, config: PreviewConfig) -> Arc<PreviewManager> {
        PreviewManager::new(config, cache, Arc::new(NullFrameGrabber))
    }

    async fn wait_for<F>(mut condition: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_thumbnail_render_applies_scaled_image() {
        let item = image_item();
        let id = item.id;
        let cache = cache_with(vec![item]).await;
        let manager = manager(Arc::clone(&cache), PreviewConfig::default());

        manager.ensure_thumbnail(id).await;
        let check_cache = Arc::clone(&cache);
        wait_for(|| {
            check_cache
                .try_lock()
                .map(|c| c.get(id).map(|e| e.thumbnail.is_some()).unwrap_or(false))
                .unwrap_or(false)
        })
        .await;

        let cache = cache.lock().await;
        let rendered = cache.get(id).unwrap().thumbnail.as_ref().unwrap();
        assert_eq!((rendered.width, rendered.height), (32, 16));
        assert_eq!(manager.tracked_thumbnails(), 1);
    }

    #[tokio::test]
    async fn test_text_item_renders_nothing() {
        let item = text_item();
        let id = item.id;
        let cache = cache_with(vec![item]).await;
        let manager = manager(Arc::clone(&cache), PreviewConfig::default());

        manager.ensure_thumbnail(id).await;
        assert!(!manager.in_flight(id, RenderKind::Thumbnail));
        assert_eq!(manager.tracked_thumbnails(), 0);
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent_while_in_flight() {
        struct StallingGrabber;
        #[async_trait]
        impl FrameGrabber for StallingGrabber {
            async fn frame_at_start(&self, _path: &Path) -> Option<image::DynamicImage> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                None
            }
        }

        let item = HistoryItem::new(
            vec![ContentRecord::inline(
                ContentKind::FileReference,
                "file:///tmp/clip.mp4",
            )],
            None,
            false,
        );
        let id = item.id;
        let cache = cache_with(vec![item]).await;
        let manager = PreviewManager::new(
            PreviewConfig::default(),
            Arc::clone(&cache),
            Arc::new(StallingGrabber),
        );

        manager.ensure_thumbnail(id).await;
        wait_for(|| manager.in_flight(id, RenderKind::Thumbnail)).await;
        // Second request while in flight is a no-op, not a second task.
        manager.ensure_thumbnail(id).await;
        assert!(manager.in_flight(id, RenderKind::Thumbnail));

        manager.cleanup_images(id).await;
        assert!(!manager.in_flight(id, RenderKind::Thumbnail));
    }

    #[tokio::test]
    async fn test_cancelled_result_is_never_applied() {
        struct SlowGrabber;
        #[async_trait]
        impl FrameGrabber for SlowGrabber {
            async fn frame_at_start(&self, _path: &Path) -> Option<image::DynamicImage> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Some(image::DynamicImage::ImageRgb8(image::RgbImage::new(8, 8)))
            }
        }

        let item = HistoryItem::new(
            vec![ContentRecord::inline(
                ContentKind::FileReference,
                "file:///tmp/clip.mp4",
            )],
            None,
            false,
        );
        let id = item.id;
        let cache = cache_with(vec![item]).await;
        let manager = PreviewManager::new(
            PreviewConfig::default(),
            Arc::clone(&cache),
            Arc::new(SlowGrabber),
        );

        manager.ensure_thumbnail(id).await;
        wait_for(|| manager.in_flight(id, RenderKind::Thumbnail)).await;
        manager.cleanup_images(id).await;

        // Give the grabber time to finish; its result must be dropped.
        tokio::time::sleep(Duration::from_millis(120)).await;
        let cache = cache.lock().await;
        assert!(cache.get(id).unwrap().thumbnail.is_none());
        assert_eq!(manager.tracked_thumbnails(), 0);
    }

    #[tokio::test]
    async fn test_preview_render_after_debounce() {
        let item = image_item();
        let id = item.id;
        let cache = cache_with(vec![item]).await;
        let config = PreviewConfig {
            preview_debounce: Duration::from_millis(20),
            ..Default::default()
        };
        let manager = manager(Arc::clone(&cache), config);

        manager.ensure_preview(id).await;
        let check_cache = Arc::clone(&cache);
        wait_for(|| {
            check_cache
                .try_lock()
                .map(|c| c.get(id).map(|e| e.preview.is_some()).unwrap_or(false))
                .unwrap_or(false)
        })
        .await;

        // Previews do not join the thumbnail tracker.
        assert_eq!(manager.tracked_thumbnails(), 0);
    }

    #[tokio::test]
    async fn test_thumbnail_ceiling_evicts_oldest() {
        let mut items = Vec::new();
        for _ in 0..8 {
            items.push(image_item());
        }
        let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        let cache = cache_with(items).await;
        let config = PreviewConfig {
            thumbnail_ceiling: 5,
            ..Default::default()
        };
        let manager = manager(Arc::clone(&cache), config);

        for id in &ids {
            manager.ensure_thumbnail(*id).await;
            let id = *id;
            wait_for(|| !manager.in_flight(id, RenderKind::Thumbnail)).await;
        }

        // Tracker never exceeds the ceiling once eviction settles.
        wait_for(|| manager.tracked_thumbnails() <= 5).await;

        // The oldest-generated thumbnails are the evicted ones.
        let check_cache = Arc::clone(&cache);
        let oldest = ids[0];
        wait_for(|| {
            check_cache
                .try_lock()
                .map(|c| c.get(oldest).map(|e| e.thumbnail.is_none()).unwrap_or(true))
                .unwrap_or(false)
        })
        .await;
        let cache = cache.lock().await;
        for id in &ids[3..] {
            assert!(cache.get(*id).unwrap().thumbnail.is_some());
        }
    }
}
