//! Single-character quick-access pins
//!
//! Pins come from the lowercase alphabet minus a reserved subset and
//! minus whatever letters the delete-item and pin-toggle hotkeys are
//! currently bound to. At most one item holds a given pin; the store
//! is the source of truth so concurrent windows cannot collide.

use std::collections::BTreeSet;
use std::collections::HashMap;

use rand::prelude::IndexedRandom;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::item::HistoryItem;
use crate::store::{ItemStore, Page, PinFilter, StoreError, StoreOrder};

/// Pin assignment policy
#[derive(Debug, Clone)]
pub struct PinManager {
    reserved: Vec<char>,
    /// Letter currently bound to the delete-item hotkey, if any
    pub delete_hotkey: Option<char>,
    /// Letter currently bound to the pin-toggle hotkey, if any
    pub pin_hotkey: Option<char>,
}

impl PinManager {
    pub fn new(reserved: Vec<char>, delete_hotkey: Option<char>, pin_hotkey: Option<char>) -> Self {
        Self {
            reserved,
            delete_hotkey,
            pin_hotkey,
        }
    }

    /// The assignable alphabet, recomputed on every call so hotkey
    /// rebinding takes effect immediately
    pub fn alphabet(&self) -> BTreeSet<char> {
        let mut letters: BTreeSet<char> = ('a'..='z').collect();
        for ch in &self.reserved {
            letters.remove(ch);
        }
        if let Some(ch) = self.delete_hotkey {
            letters.remove(&ch);
        }
        if let Some(ch) = self.pin_hotkey {
            letters.remove(&ch);
        }
        letters
    }

    /// Pins not currently assigned to any stored item
    pub async fn available_pins(&self, store: &dyn ItemStore) -> Result<BTreeSet<char>, StoreError> {
        let mut available = self.alphabet();
        let pinned = store
            .fetch(PinFilter::Pinned, StoreOrder::LastCopiedDesc, Page::all())
            .await?;
        for item in pinned {
            if let Some(pin) = item.pin {
                available.remove(&pin);
            }
        }
        Ok(available)
    }

    /// Toggle the pin on an item: clear it when pinned, otherwise
    /// assign one uniformly at random from the available set. The
    /// change is persisted. Returns the new pin value.
    pub async fn toggle_pin(
        &self,
        item: &mut HistoryItem,
        store: &dyn ItemStore,
    ) -> Result<Option<char>, StoreError> {
        if item.pin.is_some() {
            item.pin = None;
        } else {
            let available: Vec<char> = self.available_pins(store).await?.into_iter().collect();
            match available.choose(&mut rand::rng()) {
                Some(pin) => item.pin = Some(*pin),
                None => {
                    warn!("no pins available to assign");
                    return Ok(None);
                }
            }
        }
        store.update(item).await?;
        debug!("pin for {} is now {:?}", item.id, item.pin);
        Ok(item.pin)
    }

    /// Restore the at-most-one-holder-per-pin invariant. For any pin
    /// held by several items, the most recently copied holder keeps
    /// it and the rest are cleared and persisted. Returns the ids
    /// whose pin (and cached shortcuts) were cleared.
    pub async fn deduplicate_pins(&self, store: &dyn ItemStore) -> Result<Vec<Uuid>, StoreError> {
        let pinned = store
            .fetch(PinFilter::Pinned, StoreOrder::LastCopiedDesc, Page::all())
            .await?;

        let mut by_pin: HashMap<char, Vec<HistoryItem>> = HashMap::new();
        for item in pinned {
            if let Some(pin) = item.pin {
                by_pin.entry(pin).or_default().push(item);
            }
        }

        let mut cleared = Vec::new();
        for (_, mut holders) in by_pin {
            if holders.len() < 2 {
                continue;
            }
            holders.sort_by(|a, b| b.last_copied_at.cmp(&a.last_copied_at));
            for mut loser in holders.drain(1..) {
                loser.pin = None;
                store.update(&loser).await?;
                cleared.push(loser.id);
            }
        }
        if !cleared.is_empty() {
            debug!("cleared duplicate pins on {} items", cleared.len());
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ContentKind, ContentRecord};
    use crate::store::SqliteStore;
    use chrono::Duration;

    fn manager() -> PinManager {
        PinManager::new(vec!['q', 'v'], Some('d'), Some('p'))
    }

    fn text_item(text: &str) -> HistoryItem {
        HistoryItem::new(
            vec![ContentRecord::inline(ContentKind::PlainText, text)],
            None,
            false,
        )
    }

    #[test]
    fn test_alphabet_excludes_reserved_and_hotkeys() {
        let alphabet = manager().alphabet();
        assert!(!alphabet.contains(&'q'));
        assert!(!alphabet.contains(&'v'));
        assert!(!alphabet.contains(&'d'));
        assert!(!alphabet.contains(&'p'));
        assert!(alphabet.contains(&'a'));
        assert_eq!(alphabet.len(), 22);
    }

    #[test]
    fn test_alphabet_reacts_to_rebinding() {
        let mut pins = manager();
        pins.delete_hotkey = Some('x');
        let alphabet = pins.alphabet();
        assert!(!alphabet.contains(&'x'));
        assert!(alphabet.contains(&'d'));
    }

    #[tokio::test]
    async fn test_available_pins_excludes_assigned() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut item = text_item("pinned");
        item.pin = Some('b');
        store.insert(&item).await.unwrap();

        let available = manager().available_pins(&store).await.unwrap();
        assert!(!available.contains(&'b'));
        assert!(available.contains(&'a'));
    }

    #[tokio::test]
    async fn test_toggle_pin_round_trip() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let mut item = text_item("togglable");
        store.insert(&item).await.unwrap();

        let pins = manager();
        let assigned = pins.toggle_pin(&mut item, &store).await.unwrap();
        let pin = assigned.unwrap();
        assert!(pins.alphabet().contains(&pin));
        assert_eq!(
            store.fetch_by_id(item.id).await.unwrap().unwrap().pin,
            Some(pin)
        );

        let cleared = pins.toggle_pin(&mut item, &store).await.unwrap();
        assert_eq!(cleared, None);
        assert_eq!(store.fetch_by_id(item.id).await.unwrap().unwrap().pin, None);
    }

    #[tokio::test]
    async fn test_toggle_pin_exhausted_alphabet() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let pins = PinManager::new(('a'..='y').collect(), Some('z'), None);
        // Alphabet is empty: every letter reserved or hotkey-bound.
        assert!(pins.alphabet().is_empty());

        let mut item = text_item("unpinnable");
        store.insert(&item).await.unwrap();
        let assigned = pins.toggle_pin(&mut item, &store).await.unwrap();
        assert_eq!(assigned, None);
        assert_eq!(item.pin, None);
    }

    #[tokio::test]
    async fn test_deduplicate_pins_keeps_most_recent_holder() {
        let store = SqliteStore::open_in_memory().await.unwrap();

        let mut older = text_item("older");
        older.pin = Some('b');
        older.last_copied_at = older.last_copied_at - Duration::hours(2);
        store.insert(&older).await.unwrap();

        let mut newer = text_item("newer");
        newer.pin = Some('b');
        store.insert(&newer).await.unwrap();

        let mut untouched = text_item("untouched");
        untouched.pin = Some('c');
        store.insert(&untouched).await.unwrap();

        let cleared = manager().deduplicate_pins(&store).await.unwrap();
        assert_eq!(cleared, vec![older.id]);

        assert_eq!(store.fetch_by_id(older.id).await.unwrap().unwrap().pin, None);
        assert_eq!(
            store.fetch_by_id(newer.id).await.unwrap().unwrap().pin,
            Some('b')
        );
        assert_eq!(
            store.fetch_by_id(untouched.id).await.unwrap().unwrap().pin,
            Some('c')
        );

        // Invariant holds: no two stored items share a pin.
        let pinned = store
            .fetch(PinFilter::Pinned, StoreOrder::LastCopiedDesc, Page::all())
            .await
            .unwrap();
        let mut seen = std::collections::HashSet::new();
        for item in pinned {
            assert!(seen.insert(item.pin.unwrap()));
        }
    }
}
