//! Tick-indexed delayed actions (reload completion, respawn)

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::types::{PlayerId, Tick};

/// Something that happens once a tick is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    ReloadComplete { player: PlayerId, token: u32 },
    Respawn { player: PlayerId },
}

impl Deadline {
    pub fn player(&self) -> PlayerId {
        match *self {
            Deadline::ReloadComplete { player, .. } | Deadline::Respawn { player } => player,
        }
    }
}

#[derive(Debug)]
struct Entry {
    due: Tick,
    seq: u64,
    deadline: Deadline,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        (self.due, self.seq) == (other.due, other.seq)
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Min-heap of deadlines; equal due ticks fire in scheduling order
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: Tick, deadline: Deadline) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry { due, seq, deadline }));
    }

    /// Pop every deadline due at or before `now`, in due order
    pub fn pop_due(&mut self, now: Tick) -> Vec<Deadline> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.due > now {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry.deadline);
            }
        }
        due
    }

    /// Drop every pending deadline for a player
    pub fn cancel_player(&mut self, player: PlayerId) {
        self.heap.retain(|Reverse(entry)| entry.deadline.player() != player);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_due_then_schedule_order() {
        let mut queue = DeadlineQueue::new();
        let a = Deadline::Respawn { player: PlayerId(1) };
        let b = Deadline::Respawn { player: PlayerId(2) };
        let c = Deadline::ReloadComplete {
            player: PlayerId(3),
            token: 1,
        };
        queue.schedule(10, a);
        queue.schedule(5, b);
        queue.schedule(10, c);

        assert!(queue.pop_due(4).is_empty());
        assert_eq!(queue.pop_due(5), vec![b]);
        assert_eq!(queue.pop_due(20), vec![a, c]);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_player_removes_only_theirs() {
        let mut queue = DeadlineQueue::new();
        queue.schedule(3, Deadline::Respawn { player: PlayerId(1) });
        queue.schedule(3, Deadline::Respawn { player: PlayerId(2) });
        queue.cancel_player(PlayerId(1));
        assert_eq!(queue.pop_due(3), vec![Deadline::Respawn { player: PlayerId(2) }]);
    }
}
