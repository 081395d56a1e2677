//! Ranked search over the full history
//!
//! Search bypasses the cache window: the whole store is scanned so a
//! query can never miss items that were evicted from memory. Matching
//! runs over item titles and produces char-range highlight spans in
//! title coordinates. Ranking is deterministic for identical inputs.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use uuid::Uuid;

use crate::cache::WindowedCache;
use crate::item::HistoryItem;
use crate::store::{ItemStore, Page, PinFilter, StoreError, StoreOrder};

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub id: Uuid,
    pub score: i64,
    /// Char-index ranges into the item title
    pub highlights: Vec<Range<usize>>,
}

/// Score a query against a title.
///
/// A contiguous substring match wins over a scattered subsequence
/// match, and earlier matches win over later ones. Returns the score
/// and the highlight ranges, or `None` when the query does not match.
pub fn rank_title(query: &str, title: &str) -> Option<(i64, Vec<Range<usize>>)> {
    if query.is_empty() || title.is_empty() {
        return None;
    }

    let title_chars: Vec<char> = title.chars().map(fold_char).collect();
    let query_chars: Vec<char> = query.chars().map(fold_char).collect();
    let qlen = query_chars.len();
    if qlen > title_chars.len() {
        return None;
    }

    // Contiguous substring match first.
    for start in 0..=(title_chars.len() - qlen) {
        if title_chars[start..start + qlen] == query_chars[..] {
            let score = 1_000 - start.min(900) as i64;
            return Some((score, vec![start..start + qlen]));
        }
    }

    // Greedy in-order subsequence match.
    let mut positions = Vec::with_capacity(qlen);
    let mut cursor = 0;
    for qc in &query_chars {
        let found = title_chars[cursor..].iter().position(|tc| tc == qc)?;
        positions.push(cursor + found);
        cursor += found + 1;
    }

    let first = positions[0];
    let span = positions[positions.len() - 1] - first + 1;
    let gaps = (span - qlen) as i64;
    let score = 500 - first.min(400) as i64 - gaps * 2;

    let mut highlights: Vec<Range<usize>> = Vec::new();
    for pos in positions {
        match highlights.last_mut() {
            Some(range) if range.end == pos => range.end = pos + 1,
            _ => highlights.push(pos..pos + 1),
        }
    }
    Some((score, highlights))
}

fn fold_char(ch: char) -> char {
    ch.to_lowercase().next().unwrap_or(ch)
}

/// Result of a search projection
#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// Hits in descending relevance order
    pub hits: Vec<SearchHit>,
    /// Cache entries evicted by post-search retention
    pub evicted: Vec<Uuid>,
}

/// Full-store search projection
#[derive(Debug, Default)]
pub struct SearchProjector;

impl SearchProjector {
    /// Run a query over every stored item, decorate the matches with
    /// highlight spans, and trim the cache down to pinned + matched +
    /// recent entries.
    pub async fn project(
        &self,
        query: &str,
        store: &dyn ItemStore,
        cache: &mut WindowedCache,
    ) -> Result<SearchOutcome, StoreError> {
        // Full-corpus scan: O(total items) accepted by design so a
        // search never misses items outside the cached window.
        let all = store
            .fetch(PinFilter::Any, StoreOrder::LastCopiedDesc, Page::all())
            .await?;

        let sorter = cache.sorter();
        let mut hits: Vec<(SearchHit, HistoryItem)> = Vec::new();
        for item in all {
            let ranked = rank_title(query, &item.title);
            let id = item.id;
            cache.insert(item.clone());
            if let Some((score, highlights)) = ranked {
                hits.push((
                    SearchHit {
                        id,
                        score,
                        highlights,
                    },
                    item,
                ));
            }
        }

        hits.sort_by(|(a, ia), (b, ib)| {
            b.score
                .cmp(&a.score)
                .then_with(|| sorter.compare(ia, ib))
        });

        let matched: HashSet<Uuid> = hits.iter().map(|(h, _)| h.id).collect();
        cache.clear_highlights();
        for (hit, _) in &hits {
            if let Some(entry) = cache.get_mut(hit.id) {
                entry.highlights = hit.highlights.clone();
            }
        }
        let evicted = cache.retain_for_search(&matched);

        Ok(SearchOutcome {
            hits: hits.into_iter().map(|(h, _)| h).collect(),
            evicted,
        })
    }
}

/// Generation-counted debouncer: many rapid calls collapse into the
/// one that is still current once the delay has passed.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    generation: AtomicU64,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: AtomicU64::new(0),
        }
    }

    /// Register a new input event, invalidating earlier ones
    pub fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Wait out the quiet period; true when this generation is still
    /// the latest and should fire
    pub async fn settle(&self, generation: u64) -> bool {
        tokio::time::sleep(self.delay).await;
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
