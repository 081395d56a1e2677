//! Equivalence-based deduplication of captured items
//!
//! Every new capture is checked against the session log (quiet
//! re-writes of our own content) and then against the most recent
//! stored items by canonical text. A match merges into the candidate
//! and the old record is discarded.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use crate::item::HistoryItem;
use crate::store::{ItemStore, Page, PinFilter, StoreOrder};

/// How many recent items the equivalence scan inspects
pub const DEFAULT_SCAN_LIMIT: u64 = 1_000;

/// Ephemeral mapping from a pasteboard change counter to the item it
/// produced. Recognizes quiet re-copies marked by clipboard tooling.
#[derive(Debug, Default)]
pub struct SessionLog {
    entries: HashMap<i64, Uuid>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a change counter with the item it produced
    pub fn record(&mut self, counter: i64, item_id: Uuid) {
        self.entries.insert(counter, item_id);
    }

    /// Item most recently associated with the counter
    pub fn lookup(&self, counter: i64) -> Option<Uuid> {
        self.entries.get(&counter).copied()
    }

    /// Drop every entry pointing at a retired item
    pub fn retire_item(&mut self, item_id: Uuid) {
        self.entries.retain(|_, id| *id != item_id);
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// True when every non-transient content type/value pair in `existing`
/// is also present in `candidate`. Decides ordering preference between
/// two otherwise equivalent records; matching happens separately.
pub fn supersedes(candidate: &HistoryItem, existing: &HistoryItem) -> bool {
    existing
        .contents
        .iter()
        .filter(|record| !record.kind.is_transient())
        .all(|record| {
            candidate
                .contents
                .iter()
                .any(|c| c.kind == record.kind && c.payload == record.payload)
        })
}

/// A found equivalent, with the route it was found through
#[derive(Debug)]
pub struct EquivalentMatch {
    pub item: HistoryItem,
    /// Set when the match came via the session log; the quiet update
    /// already carries the right payload, so contents are not
    /// absorbed.
    pub via_session_log: bool,
}

/// Match algorithm run on every new capture
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    scan_limit: u64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self {
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }
}

impl Deduplicator {
    pub fn new(scan_limit: u64) -> Self {
        Self { scan_limit }
    }

    /// Find an existing item equivalent to `candidate`.
    ///
    /// Store failures degrade to "no match": the capture is then kept
    /// as a distinct item.
    pub async fn find_equivalent(
        &self,
        candidate: &HistoryItem,
        log: &SessionLog,
        store: &dyn ItemStore,
    ) -> Option<EquivalentMatch> {
        // Fast path: a quiet update of content we already know about.
        if let Some(counter) = candidate.modified_marker() {
            if let Some(item_id) = log.lookup(counter) {
                match store.fetch_by_id(item_id).await {
                    Ok(Some(item)) => {
                        return Some(EquivalentMatch {
                            item,
                            via_session_log: true,
                        })
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!("dedup session-log fetch failed: {err}");
                        return None;
                    }
                }
            }
        }

        let canonical = candidate.canonical_text();
        if canonical.is_empty() {
            return None;
        }

        let recent = match store
            .fetch(
                PinFilter::Any,
                StoreOrder::LastCopiedDesc,
                Page::limit(self.scan_limit),
            )
            .await
        {
            Ok(items) => items,
            Err(err) => {
                warn!("dedup scan failed: {err}");
                return None;
            }
        };

        recent
            .into_iter()
            .find(|item| item.id != candidate.id && item.canonical_text() == canonical)
            .map(|item| EquivalentMatch {
                item,
                via_session_log: false,
            })
    }
}

/// Fold a matched item into the candidate. The candidate survives
/// with its own id; the matched item is expected to be deleted by the
/// caller.
pub fn merge(candidate: &mut HistoryItem, matched: &HistoryItem, via_session_log: bool) {
    // Decide on the capture as it arrived, before contents are
    // replaced below.
    let self_generated = candidate.is_self_generated();

    if !via_session_log {
        candidate.contents = matched.contents.clone();
    }
    candidate.first_copied_at = matched.first_copied_at;
    candidate.copies += matched.copies;
    candidate.pin = matched.pin;
    candidate.title = matched.title.clone();
    if !self_generated {
        candidate.application = matched.application.clone();
    }
}
