//! Optimistic overlay: local writes not yet observed in the log.
//!
//! Entry lifecycle:
//!
//! ```text
//! insert ──► Pending ──(matching event folded)──► Confirmed ──(projection caught up)──► pruned
//!               │
//!               └──(send error | confirmation timeout)──► Failed ──► pruned immediately
//! ```
//!
//! Only the log confirms. A successful send marks the entry *accepted*,
//! which starts its confirmation timeout, but leaves it pending.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use ledgerview_core::{Address, LocalId, OrderKey, SubmissionError, TransportId};

use crate::decoder::Decoded;
use crate::domain::Domain;
use crate::projection::ProjectionState;

/// Why an entry failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The send step or the confirmation wait reported an error.
    Submission(SubmissionError),
    /// The entry stayed pending for too many cycles after its send was accepted.
    ConfirmationTimeout {
        /// Cycles waited.
        cycles: u32,
    },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submission(err) => write!(f, "{err}"),
            Self::ConfirmationTimeout { cycles } => {
                write!(f, "not confirmed after {cycles} reconciliation cycles")
            }
        }
    }
}

/// Status of an overlay entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Waiting for the log.
    Pending,
    /// A matching event was folded at `at`.
    Confirmed {
        /// Order key of the confirming event.
        at: OrderKey,
    },
    /// The submission will not land.
    Failed {
        /// Why.
        reason: FailureReason,
    },
}

impl EntryStatus {
    /// Returns true for [`EntryStatus::Pending`].
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed { .. } => "confirmed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// When an entry was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedAt {
    /// Wall-clock submission time, taken from the entry's local id.
    pub at: DateTime<Utc>,
    /// Highest sequence already folded when the entry was submitted.
    ///
    /// Only events strictly above it can confirm the entry. `None` means
    /// nothing had been fetched yet; the next successful fetch pins it.
    pub watermark: Option<u64>,
}

impl SubmittedAt {
    /// Returns true if an event at `order` happened after submission.
    ///
    /// Always false while the watermark is unresolved.
    #[must_use]
    pub fn precedes(&self, order: OrderKey) -> bool {
        self.watermark.is_some_and(|seen| order.seq > seen)
    }
}

/// One local write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayEntry<K, V> {
    /// Local submission id.
    pub local_id: LocalId,
    /// Key the write targets.
    pub key: K,
    /// Value shown while pending.
    pub proposed_value: V,
    /// Account that submitted the write.
    pub origin: Address,
    /// Submission time and watermark.
    pub submitted_at: SubmittedAt,
    /// Current status.
    pub status: EntryStatus,
    /// Transport handle once the send was accepted.
    pub transport_id: Option<TransportId>,
    /// Successful cycles observed since acceptance.
    pub cycles_waited: u32,
}

impl<K, V> OverlayEntry<K, V> {
    /// Returns true once the source accepted the send.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        self.transport_id.is_some()
    }
}

/// Local writes keyed by submission id.
#[derive(Debug, Clone)]
pub struct OptimisticOverlay<K, V> {
    entries: BTreeMap<LocalId, OverlayEntry<K, V>>,
    retired: VecDeque<(LocalId, EntryStatus)>,
    retired_capacity: usize,
}

impl<K, V> Default for OptimisticOverlay<K, V> {
    fn default() -> Self {
        Self::with_history(256)
    }
}

impl<K, V> OptimisticOverlay<K, V> {
    /// Creates an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty overlay remembering `capacity` retired entries.
    #[must_use]
    pub fn with_history(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            retired: VecDeque::new(),
            retired_capacity: capacity,
        }
    }
}

impl<K: Ord + Clone, V: Clone> OptimisticOverlay<K, V> {

    /// Adds a pending entry.
    pub fn insert(
        &mut self,
        local_id: LocalId,
        key: K,
        proposed_value: V,
        origin: Address,
        watermark: Option<u64>,
    ) -> &OverlayEntry<K, V> {
        let entry = OverlayEntry {
            local_id,
            key,
            proposed_value,
            origin,
            submitted_at: SubmittedAt {
                at: local_id.created_at(),
                watermark,
            },
            status: EntryStatus::Pending,
            transport_id: None,
            cycles_waited: 0,
        };
        self.entries.entry(local_id).or_insert(entry)
    }

    /// Records that the source accepted the send. The entry stays pending.
    ///
    /// Returns false if the entry is gone or no longer pending.
    pub fn mark_accepted(&mut self, local_id: LocalId, transport_id: TransportId) -> bool {
        match self.entries.get_mut(&local_id) {
            Some(entry) if entry.status.is_pending() => {
                entry.transport_id = Some(transport_id);
                true
            }
            _ => false,
        }
    }

    /// Moves a pending entry to confirmed.
    ///
    /// Returns false if the entry is gone or no longer pending.
    pub fn mark_confirmed(&mut self, local_id: LocalId, at: OrderKey) -> bool {
        match self.entries.get_mut(&local_id) {
            Some(entry) if entry.status.is_pending() => {
                entry.status = EntryStatus::Confirmed { at };
                true
            }
            _ => false,
        }
    }

    /// Fails a pending entry and removes it.
    ///
    /// Returns false if the entry is gone or no longer pending.
    pub fn mark_failed(&mut self, local_id: LocalId, reason: FailureReason) -> bool {
        let pending = self
            .entries
            .get(&local_id)
            .is_some_and(|entry| entry.status.is_pending());
        if !pending {
            return false;
        }
        self.entries.remove(&local_id);
        self.retire(local_id, EntryStatus::Failed { reason });
        true
    }

    /// Returns the most recent pending entry for `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&OverlayEntry<K, V>> {
        self.entries
            .values()
            .rev()
            .find(|entry| entry.status.is_pending() && &entry.key == key)
    }

    /// Returns a live entry by id.
    #[must_use]
    pub fn entry(&self, local_id: LocalId) -> Option<&OverlayEntry<K, V>> {
        self.entries.get(&local_id)
    }

    /// Returns the status of a live or recently retired entry.
    #[must_use]
    pub fn status(&self, local_id: LocalId) -> Option<EntryStatus> {
        if let Some(entry) = self.entries.get(&local_id) {
            return Some(entry.status.clone());
        }
        self.retired
            .iter()
            .rev()
            .find(|(id, _)| *id == local_id)
            .map(|(_, status)| status.clone())
    }

    /// Iterates pending entries, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &OverlayEntry<K, V>> {
        self.entries
            .values()
            .filter(|entry| entry.status.is_pending())
    }

    /// Number of pending entries.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending().count()
    }

    /// Number of live entries (pending or confirmed-not-yet-pruned).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pins every unresolved watermark to `through`, the head seen by a
    /// fetch that completed after those entries were submitted.
    ///
    /// Events already in the log at that point can no longer confirm them.
    /// Returns the number of entries pinned.
    pub fn resolve_watermarks(&mut self, through: u64) -> usize {
        let mut resolved = 0;
        for entry in self.entries.values_mut() {
            if entry.status.is_pending() && entry.submitted_at.watermark.is_none() {
                entry.submitted_at.watermark = Some(through);
                resolved += 1;
            }
        }
        resolved
    }

    /// Confirms pending entries matched by newly folded events.
    ///
    /// An event matches an entry when it writes the entry's key, its author
    /// is the entry's origin, and it happened after the entry's resolved
    /// watermark.
    /// Each event confirms at most one entry, the oldest it matches. Two
    /// submissions by the same origin to the same key inside one poll window
    /// can still confirm each other; that is an accepted limitation.
    pub fn confirm_from<D>(&mut self, domain: &D, events: &[Decoded<D::Event>]) -> Vec<LocalId>
    where
        D: Domain<Key = K, Value = V> + ?Sized,
    {
        let mut confirmed = Vec::new();
        let mut claimed = BTreeSet::new();

        for decoded in events {
            let key = domain.key_of(&decoded.event);
            let author = domain.author_of(&decoded.event);

            let matched = self
                .entries
                .values()
                .find(|entry| {
                    entry.status.is_pending()
                        && !claimed.contains(&entry.local_id)
                        && entry.key == key
                        && &entry.origin == author
                        && entry.submitted_at.precedes(decoded.order)
                })
                .map(|entry| entry.local_id);

            if let Some(local_id) = matched {
                claimed.insert(local_id);
                if self.mark_confirmed(local_id, decoded.order) {
                    tracing::debug!(%local_id, order = %decoded.order, "overlay entry confirmed by log");
                    confirmed.push(local_id);
                }
            }
        }

        confirmed
    }

    /// Counts one successful cycle against every accepted pending entry and
    /// fails those that reach `max_cycles`.
    pub fn expire(&mut self, max_cycles: u32) -> Vec<LocalId> {
        let mut expired = Vec::new();

        for entry in self.entries.values_mut() {
            if !entry.status.is_pending() || !entry.is_accepted() {
                continue;
            }
            entry.cycles_waited = entry.cycles_waited.saturating_add(1);
            if entry.cycles_waited >= max_cycles {
                expired.push((entry.local_id, entry.cycles_waited));
            }
        }

        expired
            .into_iter()
            .filter_map(|(local_id, cycles)| {
                self.mark_failed(local_id, FailureReason::ConfirmationTimeout { cycles })
                    .then_some(local_id)
            })
            .collect()
    }

    /// Removes confirmed entries whose key the projection has caught up on.
    ///
    /// A confirmed entry stays until the projection's last writer for its
    /// key is at or after the confirming event.
    pub fn prune_confirmed(&mut self, projection: &ProjectionState<K, V>) -> Vec<LocalId> {
        let ready: Vec<(LocalId, OrderKey)> = self
            .entries
            .values()
            .filter_map(|entry| match entry.status {
                EntryStatus::Confirmed { at } => projection
                    .written_at(&entry.key)
                    .is_some_and(|written| written >= at)
                    .then_some((entry.local_id, at)),
                _ => None,
            })
            .collect();

        for (local_id, at) in &ready {
            self.entries.remove(local_id);
            self.retire(*local_id, EntryStatus::Confirmed { at: *at });
        }

        ready.into_iter().map(|(local_id, _)| local_id).collect()
    }

    fn retire(&mut self, local_id: LocalId, status: EntryStatus) {
        if self.retired_capacity == 0 {
            return;
        }
        while self.retired.len() >= self.retired_capacity {
            self.retired.pop_front();
        }
        self.retired.push_back((local_id, status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Address {
        Address::new("0xa11ce").unwrap()
    }

    #[test]
    fn get_returns_latest_pending_entry_for_key() {
        let mut overlay: OptimisticOverlay<u32, &str> = OptimisticOverlay::new();
        let first = LocalId::generate();
        let second = LocalId::generate();
        overlay.insert(first, 7, "red", origin(), None);
        overlay.insert(second, 7, "blue", origin(), None);

        assert_eq!(overlay.get(&7).map(|e| e.proposed_value), Some("blue"));
        assert!(overlay.get(&8).is_none());

        overlay.mark_failed(second, FailureReason::ConfirmationTimeout { cycles: 3 });
        assert_eq!(overlay.get(&7).map(|e| e.proposed_value), Some("red"));
    }

    #[test]
    fn failed_entries_are_removed_but_status_is_remembered() {
        let mut overlay: OptimisticOverlay<u32, &str> = OptimisticOverlay::new();
        let id = LocalId::generate();
        overlay.insert(id, 1, "x", origin(), None);

        let reason = FailureReason::Submission(SubmissionError::Rejected {
            message: "nonce too low".into(),
        });
        assert!(overlay.mark_failed(id, reason.clone()));
        assert!(overlay.entry(id).is_none());
        assert_eq!(overlay.status(id), Some(EntryStatus::Failed { reason }));
        assert!(!overlay.mark_failed(id, FailureReason::ConfirmationTimeout { cycles: 1 }));
    }

    #[test]
    fn confirmed_entries_cannot_fail() {
        let mut overlay: OptimisticOverlay<u32, &str> = OptimisticOverlay::new();
        let id = LocalId::generate();
        overlay.insert(id, 1, "x", origin(), None);
        assert!(overlay.mark_confirmed(id, OrderKey::new(4, 0)));
        assert!(!overlay.mark_failed(id, FailureReason::ConfirmationTimeout { cycles: 9 }));
        assert_eq!(
            overlay.status(id),
            Some(EntryStatus::Confirmed {
                at: OrderKey::new(4, 0)
            })
        );
        assert!(overlay.get(&1).is_none());
    }

    #[test]
    fn expire_only_counts_accepted_entries() {
        let mut overlay: OptimisticOverlay<u32, &str> = OptimisticOverlay::new();
        let sent = LocalId::generate();
        let unsent = LocalId::generate();
        overlay.insert(sent, 1, "x", origin(), None);
        overlay.insert(unsent, 2, "y", origin(), None);
        overlay.mark_accepted(sent, TransportId::new("0x01").unwrap());

        assert!(overlay.expire(2).is_empty());
        assert_eq!(overlay.expire(2), vec![sent]);
        assert_eq!(
            overlay.status(sent),
            Some(EntryStatus::Failed {
                reason: FailureReason::ConfirmationTimeout { cycles: 2 }
            })
        );
        assert_eq!(overlay.entry(unsent).map(|e| e.cycles_waited), Some(0));
    }

    #[test]
    fn prune_waits_for_projection_to_catch_up() {
        let mut overlay: OptimisticOverlay<u32, &str> = OptimisticOverlay::new();
        let id = LocalId::generate();
        overlay.insert(id, 1, "x", origin(), None);
        overlay.mark_confirmed(id, OrderKey::new(5, 2));

        let mut projection = ProjectionState::empty();
        projection.put(1, "old", OrderKey::new(3, 0));
        assert!(overlay.prune_confirmed(&projection).is_empty());

        projection.put(1, "x", OrderKey::new(5, 2));
        assert_eq!(overlay.prune_confirmed(&projection), vec![id]);
        assert!(overlay.is_empty());
    }

    #[test]
    fn retired_history_is_bounded() {
        let mut overlay: OptimisticOverlay<u32, &str> = OptimisticOverlay::with_history(2);
        let ids: Vec<_> = (0..3).map(|_| LocalId::generate()).collect();
        for id in &ids {
            overlay.insert(*id, 1, "x", origin(), None);
            overlay.mark_failed(*id, FailureReason::ConfirmationTimeout { cycles: 1 });
        }
        assert!(overlay.status(ids[0]).is_none());
        assert!(overlay.status(ids[2]).is_some());
    }

    #[test]
    fn watermark_excludes_events_already_folded() {
        let submitted = SubmittedAt {
            at: Utc::now(),
            watermark: Some(10),
        };
        assert!(!submitted.precedes(OrderKey::new(10, 3)));
        assert!(submitted.precedes(OrderKey::new(11, 0)));
    }

    #[test]
    fn construction_needs_no_bounds_on_key_or_value() {
        type Opaque = std::sync::Mutex<u8>;
        let overlay: OptimisticOverlay<Opaque, Opaque> = OptimisticOverlay::default();
        assert_eq!(overlay.retired_capacity, 256);
        assert_eq!(OptimisticOverlay::<Opaque, Opaque>::with_history(4).retired_capacity, 4);
        assert!(OptimisticOverlay::<Opaque, Opaque>::new().entries.is_empty());
    }

    #[test]
    fn unresolved_watermark_confirms_nothing_until_pinned() {
        let mut overlay: OptimisticOverlay<u32, &str> = OptimisticOverlay::default();
        assert!(overlay.is_empty());

        let early = LocalId::generate();
        overlay.insert(early, 1, "x", origin(), None);
        let entry = overlay.entry(early).unwrap();
        assert_eq!(entry.submitted_at.at, early.created_at());
        assert!(!entry.submitted_at.precedes(OrderKey::new(1, 0)));
        assert!(!entry.submitted_at.precedes(OrderKey::new(u64::MAX, 0)));

        let late = LocalId::generate();
        overlay.insert(late, 2, "y", origin(), Some(3));
        assert_eq!(overlay.resolve_watermarks(5), 1);
        assert_eq!(overlay.resolve_watermarks(9), 0);

        let pinned = overlay.entry(early).unwrap().submitted_at;
        assert_eq!(pinned.watermark, Some(5));
        assert!(!pinned.precedes(OrderKey::new(5, 7)));
        assert!(pinned.precedes(OrderKey::new(6, 0)));
        assert_eq!(overlay.entry(late).unwrap().submitted_at.watermark, Some(3));
    }
}
