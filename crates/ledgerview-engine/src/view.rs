//! Merged view: the projection with pending local writes laid over it.
//!
//! One rule for every domain: a key shows the projection's value unless a
//! pending overlay entry exists for it, in which case the most recent pending
//! entry's proposed value wins. Confirmed and failed entries never shadow the
//! projection.

use std::collections::BTreeMap;

use ledgerview_core::{LocalId, OrderKey};

use crate::overlay::OptimisticOverlay;
use crate::projection::ProjectionState;

/// Where a merged value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Folded from the log.
    Authoritative {
        /// Order key of the event that last wrote the value.
        written_at: OrderKey,
    },
    /// Proposed locally and not yet confirmed.
    Optimistic {
        /// Submission that proposed the value.
        local_id: LocalId,
    },
}

impl Provenance {
    /// Returns true for values not yet confirmed by the log.
    #[must_use]
    pub const fn is_optimistic(&self) -> bool {
        matches!(self, Self::Optimistic { .. })
    }
}

/// A merged value and its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewCell<V> {
    /// Value shown to readers.
    pub value: V,
    /// Origin of the value.
    pub provenance: Provenance,
}

/// Snapshot of the merged view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedView<K, V> {
    cells: BTreeMap<K, ViewCell<V>>,
    revision: u64,
}

impl<K: Ord + Clone, V: Clone> MergedView<K, V> {
    /// Merges `overlay` over `projection`.
    #[must_use]
    pub fn compose(
        projection: &ProjectionState<K, V>,
        overlay: &OptimisticOverlay<K, V>,
        revision: u64,
    ) -> Self {
        let mut cells: BTreeMap<K, ViewCell<V>> = projection
            .slots()
            .map(|(key, slot)| {
                (
                    key.clone(),
                    ViewCell {
                        value: slot.value.clone(),
                        provenance: Provenance::Authoritative {
                            written_at: slot.written_at,
                        },
                    },
                )
            })
            .collect();

        // Pending entries iterate oldest first, so later ones overwrite.
        for entry in overlay.pending() {
            cells.insert(
                entry.key.clone(),
                ViewCell {
                    value: entry.proposed_value.clone(),
                    provenance: Provenance::Optimistic {
                        local_id: entry.local_id,
                    },
                },
            );
        }

        Self { cells, revision }
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.cells.get(key).map(|cell| &cell.value)
    }

    /// Returns the value and provenance for `key`.
    #[must_use]
    pub fn cell(&self, key: &K) -> Option<&ViewCell<V>> {
        self.cells.get(key)
    }

    /// Iterates cells in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &ViewCell<V>)> {
        self.cells.iter()
    }

    /// Keys currently shadowed by a pending entry.
    pub fn optimistic_keys(&self) -> impl Iterator<Item = &K> {
        self.cells
            .iter()
            .filter(|(_, cell)| cell.provenance.is_optimistic())
            .map(|(key, _)| key)
    }

    /// Number of keys with a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true if no key has a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Engine revision this snapshot was taken at.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }
}

/// Merged value for a single key, without building a whole snapshot.
#[must_use]
pub fn merged_value<K: Ord + Clone, V: Clone>(
    projection: &ProjectionState<K, V>,
    overlay: &OptimisticOverlay<K, V>,
    key: &K,
) -> Option<ViewCell<V>> {
    if let Some(entry) = overlay.get(key) {
        return Some(ViewCell {
            value: entry.proposed_value.clone(),
            provenance: Provenance::Optimistic {
                local_id: entry.local_id,
            },
        });
    }
    projection.slot(key).map(|slot| ViewCell {
        value: slot.value.clone(),
        provenance: Provenance::Authoritative {
            written_at: slot.written_at,
        },
    })
}
