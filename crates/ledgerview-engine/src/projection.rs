//! Projection fold: decoded events in, materialized state out.
//!
//! Events are folded in ascending order-key order through a per-domain
//! [`Reducer`]. Key invariants:
//! - The projection is a pure function of the ordered event sequence
//! - Events at or below the highest applied order key are no-ops, so
//!   re-fetching an overlapping window never double-applies
//! - Folding `E1 ++ E2` equals folding `E1`, then folding `E2` onto the result
//!
//! The last property is what makes incremental fetching valid.

use std::collections::BTreeMap;

use ledgerview_core::OrderKey;

use crate::decoder::{Decoded, EventDecoder};

/// Per-domain fold step.
pub trait Reducer: EventDecoder {
    /// Domain key (a coordinate, an account, a message id).
    type Key: Ord + Clone + std::fmt::Debug + Send + Sync + 'static;
    /// Value stored under a key.
    type Value: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static;

    /// Folds one event into the state.
    fn reduce(&self, state: &mut ProjectionState<Self::Key, Self::Value>, event: &Decoded<Self::Event>);
}

/// A projected value and the order key of the event that last wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot<V> {
    /// Current value.
    pub value: V,
    /// Order key of the last event that wrote this slot.
    pub written_at: OrderKey,
}

/// Materialized state: domain key to value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionState<K, V> {
    slots: BTreeMap<K, Slot<V>>,
    last_applied: Option<OrderKey>,
}

impl<K, V> Default for ProjectionState<K, V> {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
            last_applied: None,
        }
    }
}

impl<K: Ord + Clone, V: Clone> ProjectionState<K, V> {
    /// Returns an empty state.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the value for a key.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.slots.get(key).map(|slot| &slot.value)
    }

    /// Returns the slot (value and writer) for a key.
    #[must_use]
    pub fn slot(&self, key: &K) -> Option<&Slot<V>> {
        self.slots.get(key)
    }

    /// Returns the order key of the last event that wrote `key`.
    #[must_use]
    pub fn written_at(&self, key: &K) -> Option<OrderKey> {
        self.slots.get(key).map(|slot| slot.written_at)
    }

    /// Highest order key folded into this state.
    #[must_use]
    pub const fn last_applied(&self) -> Option<OrderKey> {
        self.last_applied
    }

    /// Number of keys with a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no key has a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates keys and values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().map(|(key, slot)| (key, &slot.value))
    }

    /// Iterates keys and slots in key order.
    pub fn slots(&self) -> impl Iterator<Item = (&K, &Slot<V>)> {
        self.slots.iter()
    }

    /// Overwrites the value for `key` (last writer wins).
    pub fn put(&mut self, key: K, value: V, written_at: OrderKey) {
        self.slots.insert(key, Slot { value, written_at });
    }

    /// Writes `value` only if `key` has none yet (first writer wins).
    ///
    /// Returns true if the value was written.
    pub fn put_if_absent(&mut self, key: K, value: V, written_at: OrderKey) -> bool {
        if self.slots.contains_key(&key) {
            return false;
        }
        self.slots.insert(key, Slot { value, written_at });
        true
    }

    /// Replaces the value for `key` with `f(current)`.
    pub fn modify(&mut self, key: K, written_at: OrderKey, f: impl FnOnce(Option<&V>) -> V) {
        let value = f(self.get(&key));
        self.slots.insert(key, Slot { value, written_at });
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.slots.remove(key).map(|slot| slot.value)
    }
}

/// Result of folding a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folded<E> {
    /// Events folded by this call, in order-key order.
    pub events: Vec<Decoded<E>>,
    /// Events skipped because they were at or below the applied watermark.
    pub skipped_stale: usize,
}

/// Owns one projection and folds events into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionStore<K, V> {
    state: ProjectionState<K, V>,
}

impl<K, V> Default for ProjectionStore<K, V> {
    fn default() -> Self {
        Self {
            state: ProjectionState::default(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> ProjectionStore<K, V> {
    /// Creates a store with an empty projection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with an existing projection.
    #[must_use]
    pub fn seeded(state: ProjectionState<K, V>) -> Self {
        Self { state }
    }

    /// Returns the current projection.
    #[must_use]
    pub fn state(&self) -> &ProjectionState<K, V> {
        &self.state
    }

    /// Consumes the store, returning the projection.
    #[must_use]
    pub fn into_state(self) -> ProjectionState<K, V> {
        self.state
    }

    /// Folds `events` onto the current projection.
    ///
    /// Events are sorted by order key first. Duplicates and events at or
    /// below the highest applied order key are skipped.
    pub fn apply<R>(&mut self, reducer: &R, mut events: Vec<Decoded<R::Event>>) -> Folded<R::Event>
    where
        R: Reducer<Key = K, Value = V> + ?Sized,
    {
        events.sort_by_key(|decoded| decoded.order);
        events.dedup_by_key(|decoded| decoded.order);

        let watermark = self.state.last_applied;
        let before = events.len();
        events.retain(|decoded| watermark.map_or(true, |applied| decoded.order > applied));
        let skipped_stale = before - events.len();

        if skipped_stale > 0 {
            tracing::debug!(skipped_stale, watermark = ?watermark, "ignoring already-applied events");
        }

        for decoded in &events {
            reducer.reduce(&mut self.state, decoded);
            self.state.last_applied = Some(decoded.order);
        }

        Folded {
            events,
            skipped_stale,
        }
    }

    /// Replaces the projection with a fold of `events` from empty.
    ///
    /// Used by the full-replay fetch strategy.
    pub fn rebuild<R>(&mut self, reducer: &R, events: Vec<Decoded<R::Event>>) -> Folded<R::Event>
    where
        R: Reducer<Key = K, Value = V> + ?Sized,
    {
        self.state = ProjectionState::default();
        self.apply(reducer, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerview_core::{DecodeError, RawRecord};

    /// Keyed counter: `(key, amount)` adds `amount` to `key`.
    struct Tally;

    impl EventDecoder for Tally {
        type Event = (char, i64);

        fn decode(&self, _raw: &RawRecord) -> Result<Self::Event, DecodeError> {
            Err(DecodeError::malformed("unused"))
        }
    }

    impl Reducer for Tally {
        type Key = char;
        type Value = i64;

        fn reduce(&self, state: &mut ProjectionState<char, i64>, event: &Decoded<(char, i64)>) {
            let (key, amount) = event.event;
            state.modify(key, event.order, |current| current.copied().unwrap_or(0) + amount);
        }
    }

    fn ev(seq: u64, sub: u32, key: char, amount: i64) -> Decoded<(char, i64)> {
        Decoded::new(OrderKey::new(seq, sub), (key, amount))
    }

    #[test]
    fn apply_sorts_before_folding() {
        let mut store = ProjectionStore::new();
        let folded = store.apply(&Tally, vec![ev(2, 0, 'a', 5), ev(1, 0, 'a', 1)]);

        assert_eq!(folded.events[0].order, OrderKey::new(1, 0));
        assert_eq!(store.state().get(&'a'), Some(&6));
        assert_eq!(store.state().written_at(&'a'), Some(OrderKey::new(2, 0)));
        assert_eq!(store.state().last_applied(), Some(OrderKey::new(2, 0)));
    }

    #[test]
    fn ties_on_sequence_are_broken_by_sub_index() {
        let mut store = ProjectionStore::new();
        let folded = store.apply(&Tally, vec![ev(4, 2, 'b', 1), ev(4, 1, 'a', 1)]);
        let orders: Vec<_> = folded.events.iter().map(|e| e.order).collect();
        assert_eq!(orders, vec![OrderKey::new(4, 1), OrderKey::new(4, 2)]);
    }

    #[test]
    fn reapplying_the_same_events_is_a_noop() {
        let events = vec![ev(1, 0, 'a', 3), ev(2, 0, 'b', 4)];
        let mut store = ProjectionStore::new();
        store.apply(&Tally, events.clone());
        let once = store.state().clone();

        let folded = store.apply(&Tally, events);
        assert_eq!(folded.skipped_stale, 2);
        assert!(folded.events.is_empty());
        assert_eq!(store.state(), &once);
    }

    #[test]
    fn duplicate_order_keys_in_one_batch_fold_once() {
        let mut store = ProjectionStore::new();
        store.apply(&Tally, vec![ev(1, 0, 'a', 3), ev(1, 0, 'a', 3)]);
        assert_eq!(store.state().get(&'a'), Some(&3));
    }

    #[test]
    fn rebuild_discards_previous_state() {
        let mut store = ProjectionStore::new();
        store.apply(&Tally, vec![ev(1, 0, 'a', 3)]);
        store.rebuild(&Tally, vec![ev(1, 0, 'a', 3), ev(2, 0, 'a', 1)]);
        assert_eq!(store.state().get(&'a'), Some(&4));
    }

    #[test]
    fn seeded_store_continues_the_fold() {
        let mut first = ProjectionStore::new();
        first.apply(&Tally, vec![ev(1, 0, 'a', 1)]);

        let mut second = ProjectionStore::seeded(first.into_state());
        second.apply(&Tally, vec![ev(2, 0, 'a', 2)]);

        let mut whole = ProjectionStore::new();
        whole.apply(&Tally, vec![ev(1, 0, 'a', 1), ev(2, 0, 'a', 2)]);
        assert_eq!(second.state(), whole.state());
    }

    #[test]
    fn put_if_absent_keeps_first_writer() {
        let mut state: ProjectionState<u8, &str> = ProjectionState::empty();
        assert!(state.put_if_absent(1, "first", OrderKey::new(1, 0)));
        assert!(!state.put_if_absent(1, "second", OrderKey::new(2, 0)));
        assert_eq!(state.get(&1), Some(&"first"));
        assert_eq!(state.remove(&1), Some("first"));
        assert!(state.is_empty());
    }
}
