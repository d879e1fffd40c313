//! Bounded per-actor history of past transforms keyed by tick

use std::collections::{HashMap, VecDeque};

use super::types::{ActorId, ActorSnapshot, Tick};

/// Snapshots kept per actor
pub const HISTORY_CAPACITY: usize = 1024;

/// Ring buffer of `(tick, snapshot)` in strictly increasing tick order
#[derive(Debug, Clone)]
pub struct ActorHistory {
    entries: VecDeque<(Tick, ActorSnapshot)>,
    capacity: usize,
}

impl ActorHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append a snapshot, evicting the oldest entry once full.
    ///
    /// Re-recording the newest tick replaces it; ticks older than the newest are ignored
    /// so ordering is never broken.
    pub fn record(&mut self, tick: Tick, snapshot: ActorSnapshot) {
        match self.entries.back_mut() {
            Some((last, slot)) if *last == tick => {
                *slot = snapshot;
                return;
            }
            Some((last, _)) if *last > tick => return,
            _ => {}
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((tick, snapshot));
    }

    /// Exact lookup
    pub fn exact(&self, tick: Tick) -> Option<ActorSnapshot> {
        self.index_of(tick).map(|i| self.entries[i].1)
    }

    /// Exact lookup, except that a tick past the newest record resolves to the newest
    /// record. The simulation rewinds before it records the current tick, so a claim
    /// for "now" would otherwise always miss.
    pub fn get(&self, tick: Tick) -> Option<ActorSnapshot> {
        match self.entries.back() {
            Some(&(last, snapshot)) if tick >= last => Some(snapshot),
            _ => self.exact(tick),
        }
    }

    /// Closest recorded snapshot by tick distance; ties prefer the older entry
    pub fn nearest(&self, tick: Tick) -> Option<(Tick, ActorSnapshot)> {
        let idx = self.entries.partition_point(|(t, _)| *t < tick);
        let after = self.entries.get(idx).copied();
        let before = idx.checked_sub(1).and_then(|i| self.entries.get(i)).copied();
        match (before, after) {
            (Some(b), Some(a)) => {
                if tick - b.0 <= a.0 - tick {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (b, a) => b.or(a),
        }
    }

    pub fn oldest_tick(&self) -> Option<Tick> {
        self.entries.front().map(|(t, _)| *t)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_of(&self, tick: Tick) -> Option<usize> {
        let (front, _) = *self.entries.front()?;
        // Contiguous recording makes the offset exact; fall back to a search otherwise
        let guess = tick.checked_sub(front)? as usize;
        if self.entries.get(guess).map(|(t, _)| *t) == Some(tick) {
            return Some(guess);
        }
        self.entries
            .binary_search_by_key(&tick, |(t, _)| *t)
            .ok()
    }
}

/// History for every tracked actor
#[derive(Debug, Default)]
pub struct ActorHistoryStore {
    histories: HashMap<ActorId, ActorHistory>,
}

impl ActorHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, actor: ActorId, tick: Tick, snapshot: ActorSnapshot) {
        self.histories
            .entry(actor)
            .or_insert_with(|| ActorHistory::new(HISTORY_CAPACITY))
            .record(tick, snapshot);
    }

    /// See [`ActorHistory::get`]
    pub fn get(&self, actor: ActorId, tick: Tick) -> Option<ActorSnapshot> {
        self.histories.get(&actor)?.get(tick)
    }

    pub fn history(&self, actor: ActorId) -> Option<&ActorHistory> {
        self.histories.get(&actor)
    }

    /// Delete an actor's history on removal
    pub fn remove(&mut self, actor: ActorId) -> bool {
        self.histories.remove(&actor).is_some()
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.histories.contains_key(&actor)
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::{PlayerId, Transform};
    use glam::Vec3;

    fn at(x: f32) -> ActorSnapshot {
        Transform::at(Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn capacity_is_never_exceeded_and_oldest_is_evicted() {
        let mut store = ActorHistoryStore::new();
        let actor = ActorId::Player(PlayerId(1));
        for tick in 0..=HISTORY_CAPACITY as Tick {
            store.record(actor, tick, at(tick as f32));
            assert!(store.history(actor).unwrap().len() <= HISTORY_CAPACITY);
        }

        let history = store.history(actor).unwrap();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.oldest_tick(), Some(1));
        assert_eq!(store.get(actor, 0), None);
        assert_eq!(store.get(actor, 1), Some(at(1.0)));
    }

    #[test]
    fn future_tick_falls_back_to_latest() {
        let mut history = ActorHistory::new(8);
        history.record(5, at(5.0));
        history.record(6, at(6.0));
        assert_eq!(history.get(7), Some(at(6.0)));
        assert_eq!(history.exact(7), None);
        assert_eq!(history.get(4), None);
    }

    #[test]
    fn lookup_survives_gaps() {
        let mut history = ActorHistory::new(8);
        for tick in [1, 2, 5, 9] {
            history.record(tick, at(tick as f32));
        }
        assert_eq!(history.exact(5), Some(at(5.0)));
        assert_eq!(history.exact(9), Some(at(9.0)));
        assert_eq!(history.exact(3), None);
    }

    #[test]
    fn nearest_picks_closest_entry() {
        let mut history = ActorHistory::new(8);
        for tick in [10, 20] {
            history.record(tick, at(tick as f32));
        }
        assert_eq!(history.nearest(0).unwrap().0, 10);
        assert_eq!(history.nearest(14).unwrap().0, 10);
        assert_eq!(history.nearest(16).unwrap().0, 20);
        assert_eq!(history.nearest(15).unwrap().0, 10);
        assert_eq!(history.nearest(99).unwrap().0, 20);
        assert!(ActorHistory::new(4).nearest(1).is_none());
    }

    #[test]
    fn out_of_order_records_are_ignored() {
        let mut history = ActorHistory::new(4);
        history.record(3, at(3.0));
        history.record(2, at(2.0));
        history.record(3, at(30.0));
        assert_eq!(history.len(), 1);
        assert_eq!(history.exact(3), Some(at(30.0)));
    }

    #[test]
    fn remove_deletes_history() {
        let mut store = ActorHistoryStore::new();
        let actor = ActorId::Prop(2);
        store.record(actor, 1, at(1.0));
        assert!(store.remove(actor));
        assert!(!store.contains(actor));
        assert_eq!(store.get(actor, 1), None);
    }
}
