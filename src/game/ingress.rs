//! Input ingress: the only structure shared between network tasks and the simulation
//!
//! Network receive tasks decode frames and append to per-player FIFO queues; the
//! simulation drains them once per tick. Each queue sits behind its map shard lock, so
//! producers and the consumer never observe a partially appended batch.

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::net::codec::Frame;
use crate::net::protocol::{ClientMsg, ProtocolError};

use super::types::{InputCommand, PlayerAction, PlayerId, ShotRequest};

/// Entries kept per queue kind before new arrivals are dropped
pub const MAX_QUEUED_PER_PLAYER: usize = 256;

#[derive(Debug, Default)]
struct PlayerQueue {
    inputs: VecDeque<InputCommand>,
    shots: VecDeque<ShotRequest>,
    actions: VecDeque<PlayerAction>,
}

/// Everything queued for one player since the last drain, each list in arrival order
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlayerBatch {
    pub actions: Vec<PlayerAction>,
    pub inputs: Vec<InputCommand>,
    pub shots: Vec<ShotRequest>,
}

impl PlayerBatch {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.inputs.is_empty() && self.shots.is_empty()
    }
}

/// Why a submitted frame was not queued
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    Malformed(ProtocolError),
    UnknownPlayer,
    QueueFull,
}

/// Result of a submit
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    Queued,
    /// Latency probes bypass the simulation; the caller answers directly
    Ping { stamp: u64 },
    Dropped(DropReason),
}

/// Per-player input queues plus the departure list
pub struct InputIngress {
    queues: DashMap<PlayerId, PlayerQueue>,
    departures: Mutex<Vec<PlayerId>>,
}

impl InputIngress {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
            departures: Mutex::new(Vec::new()),
        }
    }

    /// Create the queue for a freshly connected player
    pub fn register_player(&self, player_id: PlayerId) {
        self.queues.entry(player_id).or_default();
    }

    /// Decode a raw frame and append it to the player's queue.
    ///
    /// Malformed frames and unknown players are dropped, never surfaced as errors.
    pub fn submit(&self, player_id: PlayerId, frame: &Frame) -> Submitted {
        let msg = match ClientMsg::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(
                    player_id = %player_id,
                    opcode = frame.opcode,
                    error = %e,
                    "Dropping malformed frame"
                );
                return Submitted::Dropped(DropReason::Malformed(e));
            }
        };
        self.submit_msg(player_id, msg)
    }

    /// Append an already decoded message
    pub fn submit_msg(&self, player_id: PlayerId, msg: ClientMsg) -> Submitted {
        if let ClientMsg::Ping { stamp } = msg {
            return Submitted::Ping { stamp };
        }

        let Some(mut queue) = self.queues.get_mut(&player_id) else {
            debug!(player_id = %player_id, "Dropping frame for unknown player");
            return Submitted::Dropped(DropReason::UnknownPlayer);
        };

        let accepted = match msg {
            ClientMsg::InputState(cmd) => push_bounded(&mut queue.inputs, cmd),
            ClientMsg::WeaponShoot(shot) => push_bounded(&mut queue.shots, shot),
            other => match other.into_action() {
                Some(action) => push_bounded(&mut queue.actions, action),
                None => true,
            },
        };

        if accepted {
            Submitted::Queued
        } else {
            warn!(player_id = %player_id, "Input queue full, dropping frame");
            Submitted::Dropped(DropReason::QueueFull)
        }
    }

    /// Remove and return the player's queued input commands in arrival order
    pub fn drain(&self, player_id: PlayerId) -> Vec<InputCommand> {
        self.queues
            .get_mut(&player_id)
            .map(|mut q| q.inputs.drain(..).collect())
            .unwrap_or_default()
    }

    /// Remove and return everything queued for the player in one critical section
    pub fn drain_all(&self, player_id: PlayerId) -> Option<PlayerBatch> {
        let mut queue = self.queues.get_mut(&player_id)?;
        Some(PlayerBatch {
            actions: queue.actions.drain(..).collect(),
            inputs: queue.inputs.drain(..).collect(),
            shots: queue.shots.drain(..).collect(),
        })
    }

    /// Delete the player's queue and record the departure for the simulation.
    /// Returns false if the player was not registered.
    pub fn remove_player(&self, player_id: PlayerId) -> bool {
        let removed = self.queues.remove(&player_id).is_some();
        if removed {
            self.departures.lock().push(player_id);
        }
        removed
    }

    /// Departures recorded since the last call
    pub fn take_departures(&self) -> Vec<PlayerId> {
        std::mem::take(&mut *self.departures.lock())
    }

    /// Registered players in ascending id order
    pub fn players(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.queues.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for InputIngress {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T) -> bool {
    if queue.len() >= MAX_QUEUED_PER_PLAYER {
        return false;
    }
    queue.push_back(item);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::Buttons;
    use crate::net::codec::{encode_frame, parse_frame};
    use glam::Vec3;
    use std::sync::Arc;

    fn input(frame_id: u32) -> ClientMsg {
        ClientMsg::InputState(InputCommand {
            frame_id,
            buttons: Buttons::FORWARD,
            yaw: 0.0,
            pitch: 0.0,
            subtick: None,
        })
    }

    #[test]
    fn drains_in_submission_order() {
        let ingress = InputIngress::new();
        let id = PlayerId(1);
        ingress.register_player(id);
        for frame_id in [10, 11, 12] {
            let frame = parse_frame(input(frame_id).encode().unwrap()).unwrap();
            assert_eq!(ingress.submit(id, &frame), Submitted::Queued);
        }

        let drained: Vec<u32> = ingress.drain(id).iter().map(|c| c.frame_id).collect();
        assert_eq!(drained, vec![10, 11, 12]);
        assert!(ingress.drain(id).is_empty());
    }

    #[test]
    fn malformed_and_unknown_are_dropped() {
        let ingress = InputIngress::new();
        let id = PlayerId(1);
        ingress.register_player(id);

        let garbage = parse_frame(encode_frame(5, &[1, 2, 3])).unwrap();
        assert!(matches!(
            ingress.submit(id, &garbage),
            Submitted::Dropped(DropReason::Malformed(_))
        ));
        assert_eq!(
            ingress.submit_msg(PlayerId(2), input(1)),
            Submitted::Dropped(DropReason::UnknownPlayer)
        );
        assert!(ingress.drain_all(id).unwrap().is_empty());
    }

    #[test]
    fn ping_is_not_queued() {
        let ingress = InputIngress::new();
        assert_eq!(
            ingress.submit_msg(PlayerId(1), ClientMsg::Ping { stamp: 9 }),
            Submitted::Ping { stamp: 9 }
        );
    }

    #[test]
    fn batch_separates_kinds() {
        let ingress = InputIngress::new();
        let id = PlayerId(3);
        ingress.register_player(id);
        ingress.submit_msg(id, ClientMsg::Ready);
        ingress.submit_msg(id, input(1));
        ingress.submit_msg(
            id,
            ClientMsg::WeaponShoot(ShotRequest {
                tick: 4,
                subtick: 0.0,
                direction: Vec3::Z,
            }),
        );

        let batch = ingress.drain_all(id).unwrap();
        assert_eq!(batch.actions, vec![PlayerAction::Ready]);
        assert_eq!(batch.inputs.len(), 1);
        assert_eq!(batch.shots[0].tick, 4);
    }

    #[test]
    fn queue_is_bounded() {
        let ingress = InputIngress::new();
        let id = PlayerId(1);
        ingress.register_player(id);
        for i in 0..MAX_QUEUED_PER_PLAYER as u32 {
            assert_eq!(ingress.submit_msg(id, input(i)), Submitted::Queued);
        }
        assert_eq!(
            ingress.submit_msg(id, input(9999)),
            Submitted::Dropped(DropReason::QueueFull)
        );
        assert_eq!(ingress.drain(id).last().unwrap().frame_id, MAX_QUEUED_PER_PLAYER as u32 - 1);
    }

    #[test]
    fn remove_player_records_departure_once() {
        let ingress = InputIngress::new();
        let id = PlayerId(7);
        ingress.register_player(id);
        assert!(ingress.remove_player(id));
        assert!(!ingress.remove_player(id));
        assert_eq!(ingress.take_departures(), vec![id]);
        assert!(ingress.take_departures().is_empty());
        assert!(ingress.drain_all(id).is_none());
        assert!(ingress.drain(id).is_empty());
    }

    #[test]
    fn concurrent_producers_keep_per_player_order() {
        let ingress = Arc::new(InputIngress::new());
        let players: Vec<PlayerId> = (1..=4).map(PlayerId).collect();
        for id in &players {
            ingress.register_player(*id);
        }

        let handles: Vec<_> = players
            .iter()
            .map(|&id| {
                let ingress = ingress.clone();
                std::thread::spawn(move || {
                    for frame_id in 0..200 {
                        ingress.submit_msg(id, input(frame_id));
                    }
                })
            })
            .collect();

        let mut seen: Vec<Vec<u32>> = vec![Vec::new(); players.len()];
        while handles.iter().any(|h| !h.is_finished()) {
            for (i, id) in players.iter().enumerate() {
                seen[i].extend(ingress.drain(*id).iter().map(|c| c.frame_id));
            }
        }
        for h in handles {
            h.join().unwrap();
        }
        for (i, id) in players.iter().enumerate() {
            seen[i].extend(ingress.drain(*id).iter().map(|c| c.frame_id));
            assert_eq!(seen[i], (0..200).collect::<Vec<u32>>());
        }
    }
}
