//! Display ordering policy for history items

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::item::HistoryItem;

/// Which metadata field orders items within a pin partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Most recently copied first
    #[default]
    LastCopiedAt,
    /// First copied most recently first
    FirstCopiedAt,
    /// Most frequently copied first
    NumberOfCopies,
}

/// Where pinned items sit relative to unpinned ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PinPlacement {
    /// Pinned items sort before everything else
    #[default]
    First,
    /// Pinned items sort after everything else
    Last,
    /// Pins do not affect ordering
    Ignored,
}

/// Pure comparison policy producing a strict total order over items.
/// The tie-break on id keeps the order total, which both display
/// ordering and the recency window rely on.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sorter {
    pub key: SortKey,
    pub placement: PinPlacement,
}

impl Sorter {
    pub fn new(key: SortKey, placement: PinPlacement) -> Self {
        Self { key, placement }
    }

    /// Compare two items; `Ordering::Less` means `a` displays first
    pub fn compare(&self, a: &HistoryItem, b: &HistoryItem) -> Ordering {
        match self.placement {
            PinPlacement::Ignored => {}
            PinPlacement::First => match (a.pin.is_some(), b.pin.is_some()) {
                (true, false) => return Ordering::Less,
                (false, true) => return Ordering::Greater,
                _ => {}
            },
            PinPlacement::Last => match (a.pin.is_some(), b.pin.is_some()) {
                (true, false) => return Ordering::Greater,
                (false, true) => return Ordering::Less,
                _ => {}
            },
        }

        let by_key = match self.key {
            SortKey::LastCopiedAt => b.last_copied_at.cmp(&a.last_copied_at),
            SortKey::FirstCopiedAt => b.first_copied_at.cmp(&a.first_copied_at),
            SortKey::NumberOfCopies => b.copies.cmp(&a.copies),
        };
        by_key.then_with(|| a.id.cmp(&b.id))
    }

    /// Sort a slice of items in display order
    pub fn sort(&self, items: &mut [HistoryItem]) {
        items.sort_by(|a, b| self.compare(a, b));
    }
}
